// Outbound request envelope.
//
// Every exchange is one SOAP envelope holding one `dp:request`, which in
// turn holds exactly one operation element. Building is pure text assembly.

use std::fmt::Write as _;

use strum::{AsRefStr, Display, EnumString};

/// SOAP envelope namespace.
pub const ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Management schema namespace bound to the `dp` prefix.
pub const MANAGEMENT_NS: &str = "http://www.datapower.com/schemas/management";

/// Kind of management operation; serialises to the element name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Operation {
    GetStatus,
    GetFile,
    GetFilestore,
    GetConfig,
    GetLog,
    DoAction,
    SetFile,
    SetConfig,
    ModifyConfig,
    DelConfig,
    DoBackup,
    DoExport,
    DoImport,
}

/// One management request. Immutable once built, consumed by one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    operation: Operation,
    domain: Option<String>,
    attributes: Vec<(&'static str, String)>,
    body: Option<String>,
}

impl Request {
    fn new(operation: Operation) -> Self {
        Self {
            operation,
            domain: None,
            attributes: Vec::new(),
            body: None,
        }
    }

    fn attr(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.attributes.push((name, value.into()));
        self
    }

    fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// `get-status class="…"`.
    pub fn get_status(class: impl Into<String>) -> Self {
        Self::new(Operation::GetStatus).attr("class", class)
    }

    /// `get-file name="…"` (e.g. `temporary:///error-report.txt.gz`).
    pub fn get_file(name: impl Into<String>) -> Self {
        Self::new(Operation::GetFile).attr("name", name)
    }

    /// `get-filestore location="…"` (e.g. `temporary:`).
    pub fn get_filestore(location: impl Into<String>) -> Self {
        Self::new(Operation::GetFilestore).attr("location", location)
    }

    /// `get-config class="…" [name="…"]`.
    pub fn get_config(class: impl Into<String>, name: Option<&str>) -> Self {
        let request = Self::new(Operation::GetConfig).attr("class", class);
        match name {
            Some(name) => request.attr("name", name),
            None => request,
        }
    }

    /// `get-log [name="…"]`.
    pub fn get_log(name: Option<&str>) -> Self {
        let request = Self::new(Operation::GetLog);
        match name {
            Some(name) => request.attr("name", name),
            None => request,
        }
    }

    /// `do-action` with an opaque action fragment.
    pub fn do_action(body: impl Into<String>) -> Self {
        Self::new(Operation::DoAction).body(body)
    }

    /// `set-file name="…"` carrying base64 file content.
    pub fn set_file(name: impl Into<String>, encoded: impl Into<String>) -> Self {
        Self::new(Operation::SetFile).attr("name", name).body(encoded)
    }

    pub fn set_config(body: impl Into<String>) -> Self {
        Self::new(Operation::SetConfig).body(body)
    }

    pub fn modify_config(body: impl Into<String>) -> Self {
        Self::new(Operation::ModifyConfig).body(body)
    }

    pub fn del_config(body: impl Into<String>) -> Self {
        Self::new(Operation::DelConfig).body(body)
    }

    /// `do-backup format="…"` with a domain selection fragment.
    pub fn do_backup(format: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(Operation::DoBackup).attr("format", format).body(body)
    }

    pub fn do_export(format: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(Operation::DoExport).attr("format", format).body(body)
    }

    pub fn do_import(source_type: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(Operation::DoImport)
            .attr("source-type", source_type)
            .body(body)
    }

    /// Scope the request to an application domain.
    pub fn in_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Scope to `domain` unless the request is already scoped.
    pub fn or_domain(self, domain: Option<&str>) -> Self {
        match (&self.domain, domain) {
            (None, Some(domain)) => self.in_domain(domain),
            _ => self,
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Serialiser for the request envelope.
pub struct RequestEnvelope;

impl RequestEnvelope {
    /// Wrap `request` in the SOAP envelope and `dp:request` element.
    pub fn build(request: &Request) -> String {
        let mut xml = String::with_capacity(256 + request.body.as_ref().map_or(0, String::len));

        let _ = write!(
            xml,
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <env:Envelope xmlns:env=\"{ENVELOPE_NS}\"><env:Body>\
             <dp:request xmlns:dp=\"{MANAGEMENT_NS}\""
        );
        if let Some(ref domain) = request.domain {
            let _ = write!(xml, " domain=\"{}\"", escape(domain));
        }
        xml.push('>');

        let element = request.operation.as_ref();
        let _ = write!(xml, "<dp:{element}");
        for (name, value) in &request.attributes {
            let _ = write!(xml, " {name}=\"{}\"", escape(value));
        }
        match request.body {
            Some(ref body) => {
                let _ = write!(xml, ">{body}</dp:{element}>");
            }
            None => xml.push_str("/>"),
        }

        xml.push_str("</dp:request></env:Body></env:Envelope>");
        xml
    }
}

/// Escape text for use inside a double-quoted attribute.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const PREFIX: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
        <env:Envelope xmlns:env=\"http://schemas.xmlsoap.org/soap/envelope/\"><env:Body>";
    const SUFFIX: &str = "</env:Body></env:Envelope>";

    #[test]
    fn status_query_carries_class() {
        let xml = RequestEnvelope::build(&Request::get_status("Version").in_domain("default"));
        assert_eq!(
            xml,
            format!(
                "{PREFIX}<dp:request xmlns:dp=\"http://www.datapower.com/schemas/management\" \
                 domain=\"default\"><dp:get-status class=\"Version\"/></dp:request>{SUFFIX}"
            )
        );
    }

    #[test]
    fn file_query_carries_name_without_domain() {
        let xml = RequestEnvelope::build(&Request::get_file("temporary:///error-report.txt.gz"));
        assert!(xml.contains(
            "<dp:request xmlns:dp=\"http://www.datapower.com/schemas/management\">\
             <dp:get-file name=\"temporary:///error-report.txt.gz\"/></dp:request>"
        ));
    }

    #[test]
    fn action_body_is_inserted_verbatim() {
        let body = "<ErrorReport><RedirectToTemporary>on</RedirectToTemporary></ErrorReport>";
        let xml = RequestEnvelope::build(&Request::do_action(body));
        assert!(xml.contains(&format!("<dp:do-action>{body}</dp:do-action>")));
        assert!(xml.ends_with(SUFFIX));
    }

    #[test]
    fn filestore_and_backup_attributes() {
        let xml = RequestEnvelope::build(&Request::get_filestore("temporary:"));
        assert!(xml.contains("<dp:get-filestore location=\"temporary:\"/>"));

        let xml = RequestEnvelope::build(&Request::do_backup("ZIP", "<dp:domain name=\"all-domains\"/>"));
        assert!(xml.contains("<dp:do-backup format=\"ZIP\"><dp:domain name=\"all-domains\"/></dp:do-backup>"));
    }

    #[test]
    fn attribute_values_are_escaped() {
        let xml = RequestEnvelope::build(&Request::get_file("local:///a&b\"c.xml"));
        assert!(xml.contains("name=\"local:///a&amp;b&quot;c.xml\""));
    }

    #[test]
    fn default_domain_applies_only_when_unscoped() {
        let scoped = Request::get_status("Version").in_domain("prod").or_domain(Some("default"));
        assert_eq!(scoped.domain(), Some("prod"));
        let unscoped = Request::get_status("Version").or_domain(Some("default"));
        assert_eq!(unscoped.domain(), Some("default"));
        assert_eq!(unscoped.attribute("class"), Some("Version"));
    }

    #[test]
    fn operation_names_match_wire_elements() {
        assert_eq!(Operation::GetFilestore.to_string(), "get-filestore");
        assert_eq!(Operation::DelConfig.as_ref(), "del-config");
        assert_eq!("do-backup".parse::<Operation>().ok(), Some(Operation::DoBackup));
    }
}
