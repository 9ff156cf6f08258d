use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::EmiError;
use crate::xlsx::xml_err;

/// Read `xl/sharedStrings.xml` into plain strings, one per `<si>`.
///
/// Rich-text runs are concatenated; phonetic hints (`<rPh>`) are skipped.
pub fn parse_shared_strings(xml: &str) -> Result<Vec<String>, EmiError> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    let mut buf = Vec::new();
    let mut strings = Vec::new();

    let mut current: Option<String> = None;
    let mut in_text = false;
    let mut phonetic_depth = 0u32;

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Eof => break,
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"rPh" => phonetic_depth += 1,
                b"t" if phonetic_depth == 0 => in_text = true,
                _ => {}
            },
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"si" {
                    strings.push(String::new());
                }
            }
            Event::Text(t) if in_text => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&t.unescape().map_err(xml_err)?);
                }
            }
            Event::CData(t) if in_text => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => {
                    if let Some(s) = current.take() {
                        strings.push(s);
                    }
                }
                b"rPh" => phonetic_depth = phonetic_depth.saturating_sub(1),
                b"t" => in_text = false,
                _ => {}
            },
            _ => {}
        }
        buf.clear();
    }

    Ok(strings)
}
