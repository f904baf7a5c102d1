#![allow(dead_code)]

use flowdoc_parser::parsers::ParsedDocument;
use flowdoc_parser::{DocumentParser, ParsingConfig};
use std::path::Path;
use tempfile::TempDir;

pub const NAMESPACES: &str = r#"xmlns="http://www.mulesoft.org/schema/mule/core"
    xmlns:doc="http://www.mulesoft.org/schema/mule/documentation"
    xmlns:http="http://www.mulesoft.org/schema/mule/http"
    xmlns:file="http://www.mulesoft.org/schema/mule/file"
    xmlns:sftp="http://www.mulesoft.org/schema/mule/sftp"
    xmlns:ee="http://www.mulesoft.org/schema/mule/ee/core"
    xmlns:vm="http://www.mulesoft.org/schema/mule/vm""#;

/// Wraps flow definitions in a `<mule>` root with the usual namespaces
pub fn mule_doc(body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<mule {}>\n{}\n</mule>\n",
        NAMESPACES, body
    )
}

pub const SIMPLE_FLOW: &str = r#"
<flow name="simple-flowFlow">
    <http:listener config-ref="HTTP_Listener_config" path="/test" doc:name="Listener"/>
    <logger level="INFO" message="received" doc:name="Logger"/>
    <set-payload value="done" doc:name="Set Payload"/>
    <error-handler>
        <on-error-continue enableNotifications="true" logException="true">
            <logger level="ERROR" message="failed"/>
        </on-error-continue>
    </error-handler>
</flow>
"#;

pub const CHOICE_FLOW: &str = r##"
<flow name="routing-flow">
    <scheduler>
        <scheduling-strategy><fixed-frequency frequency="5000"/></scheduling-strategy>
    </scheduler>
    <choice doc:name="Route">
        <when expression="#[payload.kind == 'a']">
            <logger message="a"/>
        </when>
        <when expression="#[payload.kind == 'b']">
            <file:write path="out/b.txt" mode="APPEND"/>
        </when>
        <otherwise>
            <flow-ref name="fallback-sub"/>
        </otherwise>
    </choice>
</flow>
<sub-flow name="fallback-sub">
    <set-variable variableName="handled" value="true"/>
</sub-flow>
"##;

pub fn parser() -> DocumentParser {
    let config = ParsingConfig::default();
    DocumentParser::new(config.namespace_table(), &config)
}

pub fn parse_xml(file_name: &str, xml: &str) -> ParsedDocument {
    parser()
        .parse_str(Path::new(file_name), file_name, xml)
        .expect("fixture should parse")
}

/// Creates a temporary project containing the given `(relative path, contents)` files
pub fn create_project(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().expect("temp dir");
    for (relative, contents) in files {
        let path = dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(&path, contents).expect("write fixture");
    }
    dir
}

/// A flow with a single flow-ref to `target`
pub fn referencing_flow(name: &str, target: &str) -> String {
    format!(
        r#"<flow name="{}"><flow-ref name="{}"/></flow>"#,
        name, target
    )
}
