pub mod cli;
pub mod layout;
pub mod line_up;
pub mod replay;
pub mod stress;
