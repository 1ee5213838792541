//! ZAPI wire codec
//!
//! Requests are `<netapp>` documents wrapping one command element. Responses
//! wrap a `<results>` element whose `status` attribute tells success from
//! failure; failures carry `errno` and `reason` attributes.

use crate::domain::element::ZapiElement;
use crate::error::{Error, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

/// Namespace of ZAPI documents
pub const ZAPI_NAMESPACE: &str = "http://www.netapp.com/filer/admin";

// =============================================================================
// Encoding
// =============================================================================

/// Encode `request` into a ZAPI document, optionally tunneled to a vserver
pub fn encode_request(request: &ZapiElement, version: &str, vserver: Option<&str>) -> Result<String> {
    let mut writer = Writer::new(Vec::new());
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut root = BytesStart::new("netapp");
    root.push_attribute(("version", version));
    root.push_attribute(("xmlns", ZAPI_NAMESPACE));
    if let Some(vserver) = vserver {
        root.push_attribute(("vfiler", vserver));
    }
    writer.write_event(Event::Start(root))?;
    write_element(&mut writer, request)?;
    writer.write_event(Event::End(BytesEnd::new("netapp")))?;

    String::from_utf8(writer.into_inner())
        .map_err(|e| Error::ZapiParse(format!("request is not UTF-8: {}", e)))
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &ZapiElement) -> Result<()> {
    let name = element.name();
    match (element.content(), element.children().is_empty()) {
        (None, true) => {
            writer.write_event(Event::Empty(BytesStart::new(name)))?;
        }
        (content, _) => {
            writer.write_event(Event::Start(BytesStart::new(name)))?;
            if let Some(text) = content {
                writer.write_event(Event::Text(BytesText::new(text)))?;
            }
            for child in element.children() {
                write_element(writer, child)?;
            }
            writer.write_event(Event::End(BytesEnd::new(name)))?;
        }
    }
    Ok(())
}

// =============================================================================
// Decoding
// =============================================================================

#[derive(Debug, Default)]
struct ResultsStatus {
    passed: bool,
    errno: Option<String>,
    reason: Option<String>,
}

/// Decode a ZAPI response for `command` into its `results` element.
///
/// A `failed` status is returned as [`Error::Zapi`].
pub fn decode_response(command: &str, xml: &str) -> Result<ZapiElement> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<ZapiElement> = Vec::new();
    let mut root: Option<ZapiElement> = None;
    let mut status: Option<ResultsStatus> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                let name = element_name(&start)?;
                if name == "results" {
                    status = Some(results_status(&start)?);
                }
                stack.push(ZapiElement::new(name));
            }
            Event::Empty(start) => {
                let name = element_name(&start)?;
                if name == "results" {
                    status = Some(results_status(&start)?);
                }
                attach(&mut stack, &mut root, ZapiElement::new(name));
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    top.set_content(text.unescape()?.into_owned());
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.set_content(String::from_utf8_lossy(&data.into_inner()).into_owned());
                }
            }
            Event::End(_) => {
                let done = stack
                    .pop()
                    .ok_or_else(|| Error::ZapiParse("unbalanced end tag".into()))?;
                attach(&mut stack, &mut root, done);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let root = root.ok_or_else(|| Error::ZapiParse("empty response".into()))?;
    let results = if root.name() == "results" {
        root
    } else {
        root.child("results")
            .cloned()
            .ok_or_else(|| Error::ZapiParse(format!("no results element in {} response", command)))?
    };

    let status = status.unwrap_or_default();
    if !status.passed {
        return Err(Error::Zapi {
            command: command.to_string(),
            code: status.errno.unwrap_or_else(|| "unknown".to_string()),
            message: status.reason.unwrap_or_else(|| "no reason given".to_string()),
        });
    }

    Ok(results)
}

fn attach(stack: &mut [ZapiElement], root: &mut Option<ZapiElement>, element: ZapiElement) {
    match stack.last_mut() {
        Some(parent) => parent.add_child(element),
        None => *root = Some(element),
    }
}

fn element_name(start: &BytesStart<'_>) -> Result<String> {
    std::str::from_utf8(start.local_name().as_ref())
        .map(str::to_string)
        .map_err(|e| Error::ZapiParse(format!("element name is not UTF-8: {}", e)))
}

fn results_status(start: &BytesStart<'_>) -> Result<ResultsStatus> {
    let mut status = ResultsStatus::default();
    if let Some(attr) = start.try_get_attribute("status").map_err(quick_xml::Error::from)? {
        status.passed = attr.unescape_value()? == "passed";
    }
    if let Some(attr) = start.try_get_attribute("errno").map_err(quick_xml::Error::from)? {
        status.errno = Some(attr.unescape_value()?.into_owned());
    }
    if let Some(attr) = start.try_get_attribute("reason").map_err(quick_xml::Error::from)? {
        status.reason = Some(attr.unescape_value()?.into_owned());
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_request() {
        let request = ZapiElement::new("lun-resize")
            .child_value("path", "/vol/v1/a&b")
            .child_value("size", 1024)
            .child_element(ZapiElement::new("empty"));

        let xml = encode_request(&request, "1.110", Some("vs1")).unwrap();

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<netapp version=\"1.110\" xmlns=\"http://www.netapp.com/filer/admin\" vfiler=\"vs1\">"));
        assert!(xml.contains("<path>/vol/v1/a&amp;b</path>"));
        assert!(xml.contains("<size>1024</size>"));
        assert!(xml.contains("<empty/>"));
        assert!(xml.ends_with("</lun-resize></netapp>"));
    }

    #[test]
    fn test_encode_without_vserver() {
        let xml = encode_request(&ZapiElement::new("system-get-version"), "1.21", None).unwrap();
        assert!(!xml.contains("vfiler"));
        assert!(xml.contains("<system-get-version/>"));
    }

    #[test]
    fn test_decode_passed() {
        let xml = r#"<?xml version='1.0' encoding='UTF-8'?>
            <netapp version='1.110' xmlns='http://www.netapp.com/filer/admin'>
              <results status="passed">
                <attributes-list>
                  <lun-info>
                    <path>/vol/v1/lun1</path>
                    <size>5368709120</size>
                    <mapped>false</mapped>
                  </lun-info>
                </attributes-list>
                <num-records>1</num-records>
                <next-tag>&lt;tag&gt;</next-tag>
              </results>
            </netapp>"#;

        let results = decode_response("lun-get-iter", xml).unwrap();
        assert_eq!(results.name(), "results");
        assert_eq!(results.child_u64("num-records"), Some(1));
        assert_eq!(results.child_content("next-tag"), Some("<tag>"));
        let lun = &results.child("attributes-list").unwrap().children()[0];
        assert_eq!(lun.child_content("path"), Some("/vol/v1/lun1"));
        assert_eq!(lun.child_u64("size"), Some(5_368_709_120));
    }

    #[test]
    fn test_decode_failed() {
        let xml = r#"<netapp version="1.110"><results status="failed" errno="9042" reason="New LUN size is the same as the old LUN size"/></netapp>"#;
        let err = decode_response("lun-resize", xml).unwrap_err();
        assert!(err.is_size_unchanged());
        assert!(err.to_string().contains("New LUN size is the same"));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(decode_response("lun-get-iter", "").is_err());
        assert!(decode_response("lun-get-iter", "<netapp></netapp>").is_err());
    }
}
