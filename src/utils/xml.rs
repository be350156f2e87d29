//! XML well-formedness and MX message-type identification.
//!
//! Only syntax is checked here. Schema-level validation is out of scope.

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::{NsReader, Reader};

use crate::constants::unknown_if_blank;

/// `true` when `xml` parses as a single well-formed document.
///
/// `None`, empty and whitespace-only input are not well-formed.
pub fn is_well_formed(xml: Option<&str>) -> bool {
    let Some(xml) = xml else {
        return false;
    };
    let xml = xml.trim_start_matches('\u{feff}');
    if xml.trim().is_empty() {
        return false;
    }

    let mut reader = Reader::from_str(xml);
    let mut open: Vec<Vec<u8>> = Vec::new();
    let mut root_seen = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if open.is_empty() {
                    if root_seen {
                        return false;
                    }
                    root_seen = true;
                }
                if !attributes_ok(&e) {
                    return false;
                }
                open.push(e.name().as_ref().to_vec());
            }
            Ok(Event::End(e)) => match open.pop() {
                Some(name) if name == e.name().as_ref() => {}
                _ => return false,
            },
            Ok(Event::Empty(e)) => {
                if open.is_empty() {
                    if root_seen {
                        return false;
                    }
                    root_seen = true;
                }
                if !attributes_ok(&e) {
                    return false;
                }
            }
            Ok(Event::Text(text)) => {
                if open.is_empty() && !text.iter().all(u8::is_ascii_whitespace) {
                    return false;
                }
                if text.unescape().is_err() {
                    return false;
                }
            }
            Ok(Event::CData(_)) if open.is_empty() => return false,
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => return false,
        }
    }

    root_seen && open.is_empty()
}

fn attributes_ok(element: &BytesStart<'_>) -> bool {
    element.attributes().all(|attr| attr.is_ok())
}

/// Message-type id declared by the document, or `"unknown"`.
///
/// Prefers the namespace of the ISO 20022 `Document` element; falls back to the
/// root element's namespace. A namespace whose last segment does not look like
/// `xxxx.nnn.nnn.nn` yields `"unknown"`.
pub fn identify_message_type(xml: &str) -> String {
    let mut reader = NsReader::from_str(xml.trim_start_matches('\u{feff}'));
    let mut root_namespace: Option<String> = None;
    let mut document_namespace: Option<String> = None;

    loop {
        match reader.read_resolved_event() {
            Ok((resolved, Event::Start(e))) | Ok((resolved, Event::Empty(e))) => {
                let namespace = match resolved {
                    ResolveResult::Bound(ns) => {
                        Some(String::from_utf8_lossy(ns.as_ref()).into_owned())
                    }
                    _ => None,
                };
                if root_namespace.is_none() {
                    root_namespace = Some(namespace.clone().unwrap_or_default());
                }
                if e.local_name().as_ref() == b"Document" {
                    document_namespace = namespace;
                    break;
                }
            }
            Ok((_, Event::Eof)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    let candidate = document_namespace
        .or(root_namespace)
        .and_then(|ns| message_type_from_namespace(&ns));
    unknown_if_blank(candidate.as_deref())
}

/// Local name of the first element inside `Document`, e.g. `FIToFICstmrCdtTrf`
pub fn document_body_element(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml.trim_start_matches('\u{feff}'));
    let mut inside_document = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let local = e.local_name();
                if inside_document {
                    return Some(String::from_utf8_lossy(local.as_ref()).into_owned());
                }
                if local.as_ref() == b"Document" {
                    inside_document = true;
                }
            }
            Ok(Event::End(e)) if inside_document && e.local_name().as_ref() == b"Document" => {
                return None;
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

/// Extract `pacs.008.001.08` from `urn:iso:std:iso:20022:tech:xsd:pacs.008.001.08`
pub fn message_type_from_namespace(namespace: &str) -> Option<String> {
    let candidate = namespace.rsplit(':').next()?.trim();
    is_message_type_id(candidate).then(|| candidate.to_string())
}

fn is_message_type_id(candidate: &str) -> bool {
    fn digits(part: &str, len: usize) -> bool {
        part.len() == len && part.bytes().all(|b| b.is_ascii_digit())
    }

    let parts: Vec<&str> = candidate.split('.').collect();
    match parts.as_slice() {
        [area, variant, function, version] => {
            area.len() == 4
                && area.bytes().all(|b| b.is_ascii_lowercase())
                && digits(variant, 3)
                && digits(function, 3)
                && digits(version, 2)
        }
        _ => false,
    }
}
