pub mod toml_loader;

pub use toml_loader::{load_reference_data, load_sheets_from_folder, load_template_layouts};
