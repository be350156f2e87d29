//! Filename tagging.
//!
//! A claimed file is renamed to `$$<process id>$$<original name>` so that any
//! later stage, or a recovering instance, can rebuild correlation from the
//! name alone.

use crate::constants::FILENAME_DELIMITER;
use crate::error::{PipelineError, PipelineResult};
use crate::models::ProcessId;

fn separator() -> String {
    FILENAME_DELIMITER.repeat(2)
}

/// Embed `process_id` in `name`
pub fn tag_file_name(name: &str, process_id: ProcessId) -> PipelineResult<String> {
    if name.trim().is_empty() {
        return Err(PipelineError::filename_format(name, "file name is blank"));
    }
    if !process_id.is_valid() {
        return Err(PipelineError::filename_format(
            name,
            format!("process id {process_id} is not a ledger id"),
        ));
    }
    let sep = separator();
    Ok(format!("{sep}{process_id}{sep}{name}"))
}

fn split_tagged(tagged: &str) -> PipelineResult<(&str, &str)> {
    let sep = separator();
    let fields: Vec<&str> = tagged.splitn(3, sep.as_str()).collect();
    match fields.as_slice() {
        [prefix, id, name] => {
            if !prefix.is_empty() {
                return Err(PipelineError::filename_format(
                    tagged,
                    format!("expected name to start with '{sep}'"),
                ));
            }
            if name.trim().is_empty() {
                return Err(PipelineError::filename_format(tagged, "original name is blank"));
            }
            Ok((id, name))
        }
        _ => Err(PipelineError::filename_format(
            tagged,
            format!("expected at least 3 fields separated by '{sep}'"),
        )),
    }
}

/// Second field of a tagged name
pub fn extract_process_id(tagged: &str) -> PipelineResult<ProcessId> {
    let (id, _) = split_tagged(tagged)?;
    id.parse()
        .map_err(|reason: String| PipelineError::filename_format(tagged, reason))
}

/// Third field of a tagged name
pub fn extract_original_name(tagged: &str) -> PipelineResult<String> {
    split_tagged(tagged).map(|(_, name)| name.to_string())
}

/// Remove every Unicode line break sequence
pub fn strip_line_breaks(content: &str) -> String {
    content
        .chars()
        .filter(|c| {
            !matches!(
                c,
                '\n' | '\r' | '\u{000B}' | '\u{000C}' | '\u{0085}' | '\u{2028}' | '\u{2029}'
            )
        })
        .collect()
}

/// Case-insensitive extension check (`extension` without the dot)
pub fn has_extension(name: &str, extension: &str) -> bool {
    std::path::Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_and_extracts() {
        let tagged = tag_file_name("pacs.008.001.08.xml", ProcessId::from(42)).unwrap();
        assert_eq!(tagged, "$$42$$pacs.008.001.08.xml");
        assert_eq!(extract_process_id(&tagged).unwrap(), ProcessId::from(42));
        assert_eq!(extract_original_name(&tagged).unwrap(), "pacs.008.001.08.xml");
    }

    #[test]
    fn names_containing_the_separator_survive() {
        let tagged = tag_file_name("odd$$name.xml", ProcessId::from(9)).unwrap();
        assert_eq!(extract_original_name(&tagged).unwrap(), "odd$$name.xml");
        assert_eq!(extract_process_id(&tagged).unwrap(), ProcessId::from(9));
    }

    #[test]
    fn tagging_rejects_blank_names_and_invalid_ids() {
        assert!(tag_file_name("", ProcessId::from(1)).is_err());
        assert!(tag_file_name("   ", ProcessId::from(1)).is_err());
        assert!(tag_file_name("a.xml", ProcessId::from(0)).is_err());
    }

    #[test]
    fn untagged_names_are_format_errors() {
        for name in ["plain.xml", "$$42", "x$$42$$a.xml", "$$abc$$a.xml", "$$42$$", ""] {
            let err = extract_original_name(name)
                .and_then(|_| extract_process_id(name).map(|_| String::new()))
                .unwrap_err();
            assert!(
                matches!(err, PipelineError::FilenameFormat { .. }),
                "{name}: {err}"
            );
        }
    }

    #[test]
    fn strips_all_line_break_kinds() {
        assert_eq!(strip_line_breaks("<a>\r\n<b/>\n</a>\u{2028}"), "<a><b/></a>");
    }

    #[test]
    fn extension_check_ignores_case() {
        assert!(has_extension("message.XML", "xml"));
        assert!(has_extension("$$1$$message.xml", "xml"));
        assert!(!has_extension("message.txt", "xml"));
        assert!(!has_extension("xml", "xml"));
    }
}
