//! Minimal FHIR `Parameters` resource (de)serialization, XML flavor.
//!
//! Only the shapes the pseudonymization service wire protocol actually uses
//! are supported: a flat list of `parameter` elements carrying a `valueString`
//! on the request side, and `parameter`/`part` pairs carrying `valueIdentifier`
//! on the response side. This is not a general FHIR library.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use std::io::Cursor;

use crate::error::{PseudonymError, Result};

/// Builds the request body for a pseudonymize/depseudonymize call.
///
/// `value_param_name` is `"original"` when requesting pseudonyms for known
/// originals, `"pseudonym"` when requesting originals for known pseudonyms.
pub fn build_parameters_xml(
    domain: &str,
    allow_create: bool,
    value_param_name: &str,
    values: &[String],
) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    let mut root = BytesStart::new("Parameters");
    root.push_attribute(("xmlns", "http://hl7.org/fhir"));
    writer
        .write_event(Event::Start(root.borrow()))
        .map_err(xml_write_err)?;

    write_string_parameter(&mut writer, "id", "Pseudonymization-DicomShield")?;
    write_string_parameter(&mut writer, "target", domain)?;
    if allow_create {
        write_string_parameter(&mut writer, "allowCreate", "true")?;
    }
    for value in values {
        write_string_parameter(&mut writer, value_param_name, value)?;
    }

    writer
        .write_event(Event::End(root.to_end()))
        .map_err(xml_write_err)?;

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| PseudonymError::Xml(e.to_string()))
}

fn write_string_parameter<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: &str,
) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new("parameter")))
        .map_err(xml_write_err)?;

    let mut name_el = BytesStart::new("name");
    name_el.push_attribute(("value", name));
    writer
        .write_event(Event::Empty(name_el))
        .map_err(xml_write_err)?;

    let mut value_el = BytesStart::new("valueString");
    value_el.push_attribute(("value", value));
    writer
        .write_event(Event::Empty(value_el))
        .map_err(xml_write_err)?;

    writer
        .write_event(Event::End(quick_xml::events::BytesEnd::new("parameter")))
        .map_err(xml_write_err)?;

    Ok(())
}

fn xml_write_err(e: quick_xml::Error) -> PseudonymError {
    PseudonymError::Xml(e.to_string())
}

/// A FHIR `parameter` whose two `part`s carry `original` and `pseudonym`
/// identifier values, as returned by both gPAS and MII.
#[derive(Debug, Default)]
struct PendingParameter {
    original: Option<String>,
    pseudonym: Option<String>,
}

/// Parses a response body into `(original, pseudonym)` pairs.
///
/// Parameters missing either half (e.g. an unknown lookup the service
/// omitted entirely) are skipped rather than erroring — the caller treats
/// the missing mapping as a lookup miss, per the sentinel policy.
pub fn parse_parameter_pairs(xml: &str) -> Result<Vec<(String, String)>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut pairs = Vec::new();
    let mut current: Option<PendingParameter> = None;
    let mut current_part_name: Option<String> = None;
    let mut in_value_identifier = false;
    let mut depth_parameter = 0usize;

    loop {
        match reader.read_event().map_err(|e| PseudonymError::Xml(e.to_string()))? {
            Event::Start(e) | Event::Empty(e) => {
                let local = local_name(&e);
                match local.as_str() {
                    "parameter" if depth_parameter == 0 => {
                        current = Some(PendingParameter::default());
                        depth_parameter = 1;
                    }
                    "part" => {
                        current_part_name = None;
                    }
                    "name" => {
                        if let Some(attr) = find_attr(&e, "value") {
                            current_part_name = Some(attr);
                        }
                    }
                    "valueIdentifier" => {
                        in_value_identifier = true;
                    }
                    "value" if in_value_identifier => {
                        if let (Some(attr), Some(name), Some(param)) = (
                            find_attr(&e, "value"),
                            current_part_name.clone(),
                            current.as_mut(),
                        ) {
                            match name.as_str() {
                                "original" => param.original = Some(attr),
                                "pseudonym" => param.pseudonym = Some(attr),
                                _ => {}
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::End(e) => {
                let local = local_name(&e);
                match local.as_str() {
                    "valueIdentifier" => in_value_identifier = false,
                    "parameter" => {
                        if let Some(param) = current.take() {
                            if let (Some(o), Some(p)) = (param.original, param.pseudonym) {
                                pairs.push((o, p));
                            }
                        }
                        depth_parameter = 0;
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(pairs)
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn find_attr(e: &BytesStart, key: &str) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.as_ref() == key.as_bytes() {
            Some(String::from_utf8_lossy(a.value.as_ref()).into_owned())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_pseudonymize_request_without_allow_create() {
        let xml = build_parameters_xml(
            "TEST-DOMAIN",
            false,
            "original",
            &["123456".to_string(), "S".to_string()],
        )
        .unwrap();

        assert!(xml.contains(r#"<name value="target""#));
        assert!(xml.contains(r#"<valueString value="TEST-DOMAIN""#));
        assert!(!xml.contains("allowCreate"));
        assert!(xml.contains(r#"<valueString value="123456""#));
        assert!(xml.contains(r#"<valueString value="S""#));
    }

    #[test]
    fn builds_pseudonymize_request_with_allow_create() {
        let xml =
            build_parameters_xml("TEST-DOMAIN", true, "original", &["123456".to_string()]).unwrap();
        assert!(xml.contains(r#"<name value="allowCreate""#));
        assert!(xml.contains(r#"<valueString value="true""#));
    }

    #[test]
    fn parses_response_parameter_pairs() {
        let xml = r#"
        <Parameters xmlns="http://hl7.org/fhir">
            <parameter>
                <name value="result"/>
                <part>
                    <name value="original"/>
                    <valueIdentifier><value value="123456"/></valueIdentifier>
                </part>
                <part>
                    <name value="pseudonym"/>
                    <valueIdentifier><value value="PSEUDO-1"/></valueIdentifier>
                </part>
            </parameter>
        </Parameters>
        "#;

        let pairs = parse_parameter_pairs(xml).unwrap();
        assert_eq!(pairs, vec![("123456".to_string(), "PSEUDO-1".to_string())]);
    }

    #[test]
    fn skips_parameters_missing_one_half() {
        let xml = r#"
        <Parameters xmlns="http://hl7.org/fhir">
            <parameter>
                <part>
                    <name value="original"/>
                    <valueIdentifier><value value="ONLY-ORIGINAL"/></valueIdentifier>
                </part>
            </parameter>
        </Parameters>
        "#;
        let pairs = parse_parameter_pairs(xml).unwrap();
        assert!(pairs.is_empty());
    }
}
