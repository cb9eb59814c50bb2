use clap::{Parser, Subcommand};
use pageheap_cli::{
    cli::HeapArgs,
    layout::layout,
    line_up,
    replay::replay,
    stress::{StressOptions, stress},
};
use std::{error::Error, path::PathBuf};

#[derive(Parser, Debug)]
#[command(author, version, about = "Paged binary heap tooling", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the randomized insert/replace/drain/update workload
    Stress {
        /// Number of objects
        #[arg(short = 'n', long, default_value_t = 131_101)]
        items: usize,

        /// Operations in the replace and update phases
        #[arg(short = 'm', long, default_value_t = 500_083)]
        ops: usize,

        #[arg(long, default_value_t = 2)]
        rounds: usize,

        /// Seed for the key generator
        #[arg(long, default_value_t = 1)]
        seed: u64,

        /// Verify the full heap order after every operation (slow)
        #[arg(long)]
        paranoid: bool,

        /// Disable progress bars
        #[arg(long)]
        no_progress_bar: bool,

        #[command(flatten)]
        heap: HeapArgs,
    },
    /// Print parent and children for a range of slots
    Layout {
        /// First slot to print
        #[arg(long, default_value_t = 1)]
        from: u32,

        /// Number of slots to print
        #[arg(long, default_value_t = 32)]
        count: u32,

        #[command(flatten)]
        heap: HeapArgs,
    },
    /// Replay a timer script against an expiry queue
    Replay {
        /// Script file, or `-` for stdin
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// Line buffer size in bytes
        #[arg(long, default_value_t = line_up::DEFAULT_BUFSIZE)]
        bufsize: usize,

        #[command(flatten)]
        heap: HeapArgs,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    match args.command {
        Command::Stress {
            items,
            ops,
            rounds,
            seed,
            paranoid,
            no_progress_bar,
            heap,
        } => {
            let opts = StressOptions {
                items,
                ops,
                rounds,
                seed,
                paranoid,
                config: heap.to_config(),
            };
            stress(opts, no_progress_bar)
        }
        Command::Layout { from, count, heap } => layout(heap.to_config(), from, count),
        Command::Replay {
            path,
            bufsize,
            heap,
        } => replay(path, heap.to_config(), bufsize),
    }
}
