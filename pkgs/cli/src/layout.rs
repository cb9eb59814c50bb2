use comfy_table::{Cell, ContentArrangement, Table};
use itertools::Itertools;
use pageheap_core::{HeapConfig, Layout, NO_SLOT, ROOT, Slot};
use std::error::Error;

/// One line of the slot map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRow {
    pub slot: Slot,
    pub page: u32,
    pub parent: Option<Slot>,
    pub children: Vec<Slot>,
}

/// Describes `count` slots starting at `from` under the layout chosen by `config`.
pub fn slot_rows(config: &HeapConfig, from: Slot, count: u32) -> Result<Vec<SlotRow>, Box<dyn Error>> {
    let layout = config.validate()?;
    let page_shift = config.page_size.trailing_zeros();
    let from = from.max(ROOT);
    let to = from.saturating_add(count).min(NO_SLOT);

    Ok((from..to)
        .map(|slot| {
            let (left, right) = layout.children(slot);
            let children = [left, right]
                .into_iter()
                .filter(|&c| c != NO_SLOT)
                .dedup()
                .collect();
            SlotRow {
                slot,
                page: slot >> page_shift,
                parent: (slot > ROOT).then(|| layout.parent(slot)),
                children,
            }
        })
        .collect())
}

/// CLI entry point: prints parent and children of a slot range.
pub fn layout(config: HeapConfig, from: Slot, count: u32) -> Result<(), Box<dyn Error>> {
    let rows = slot_rows(&config, from, count)?;
    let kind = match config.validate()? {
        Layout::Paged(page) => format!("paged, {} slots/page", page.size()),
        Layout::Flat => "flat".to_string(),
    };

    let mut table = Table::new();
    table
        .load_preset(comfy_table::presets::UTF8_HORIZONTAL_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Slot", "Page", "Parent", "Children"]);

    for row in rows {
        table.add_row(vec![
            Cell::new(row.slot),
            Cell::new(row.page),
            Cell::new(row.parent.map_or("-".to_string(), |p| p.to_string())),
            Cell::new(row.children.iter().join(", ")),
        ]);
    }

    println!("Layout: {}", kind);
    println!("{table}");
    Ok(())
}
