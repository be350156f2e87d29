pub mod filename;
pub mod serde;
pub mod xml;

pub use filename::{
    extract_original_name, extract_process_id, has_extension, strip_line_breaks, tag_file_name,
};
pub use xml::{document_body_element, identify_message_type, is_well_formed};
