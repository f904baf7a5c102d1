use roxmltree::Node;
use shared_types::{GlobalConfig, GlobalConfigEntry, NOT_SPECIFIED};

use super::namespaces::NamespaceTable;

/// Name recorded for a configuration block without a `name` attribute
pub const UNNAMED_CONFIG: &str = "Unknown";

/// Extracts every file, sftp and http configuration block in document order.
///
/// Runs over the whole tree independently of flow extraction, so a document
/// holding only global configuration still yields its entries.
pub fn extract_global_configs(
    root: Node,
    namespaces: &NamespaceTable,
    file_name: &str,
) -> Vec<GlobalConfigEntry> {
    root.descendants()
        .filter(|node| node.is_element())
        .filter_map(|node| {
            let config = read_config(node, namespaces)?;
            Some(GlobalConfigEntry {
                name: node.attribute("name").unwrap_or(UNNAMED_CONFIG).to_string(),
                file_name: file_name.to_string(),
                config,
            })
        })
        .collect()
}

fn read_config(node: Node, ns: &NamespaceTable) -> Option<GlobalConfig> {
    if ns.is_named(node, "file", "config") {
        let connection = child_named(node, ns, "file", "connection");
        let working_directory = node
            .attribute("workingDirectory")
            .or_else(|| connection.and_then(|c| c.attribute("workingDir")))
            .unwrap_or(NOT_SPECIFIED);
        return Some(GlobalConfig::File {
            working_directory: working_directory.to_string(),
        });
    }

    if ns.is_named(node, "sftp", "config") {
        let connection = child_named(node, ns, "sftp", "connection");
        let field = |key: &str, default: &str| {
            connection
                .and_then(|c| c.attribute(key))
                .unwrap_or(default)
                .to_string()
        };
        return Some(GlobalConfig::Sftp {
            host: field("host", NOT_SPECIFIED),
            port: field("port", "22"),
            username: field("username", NOT_SPECIFIED),
        });
    }

    if ns.is_named(node, "http", "listener-config") {
        let connection = child_named(node, ns, "http", "listener-connection");
        let field = |key: &str, default: &str| {
            connection
                .and_then(|c| c.attribute(key))
                .unwrap_or(default)
                .to_string()
        };
        return Some(GlobalConfig::HttpListener {
            host: field("host", "0.0.0.0"),
            port: field("port", "8081"),
            base_path: node.attribute("basePath").unwrap_or("/").to_string(),
        });
    }

    if ns.is_named(node, "http", "request-config") {
        let connection = child_named(node, ns, "http", "request-connection");
        let field = |key: &str, default: &str| {
            connection
                .and_then(|c| c.attribute(key))
                .unwrap_or(default)
                .to_string()
        };
        return Some(GlobalConfig::HttpRequest {
            host: field("host", NOT_SPECIFIED),
            port: field("port", "80"),
            protocol: field("protocol", "HTTP"),
            base_path: node.attribute("basePath").unwrap_or("/").to_string(),
        });
    }

    None
}

fn child_named<'a, 'input>(
    node: Node<'a, 'input>,
    ns: &NamespaceTable,
    prefix: &str,
    local: &str,
) -> Option<Node<'a, 'input>> {
    node.descendants()
        .skip(1)
        .find(|n| ns.is_named(*n, prefix, local))
}

#[cfg(test)]
mod tests {
    use super::*;
    use roxmltree::Document;

    fn configs(body: &str) -> Vec<GlobalConfigEntry> {
        let xml = format!(
            r#"<mule xmlns="http://www.mulesoft.org/schema/mule/core"
                xmlns:http="http://www.mulesoft.org/schema/mule/http"
                xmlns:file="http://www.mulesoft.org/schema/mule/file"
                xmlns:sftp="http://www.mulesoft.org/schema/mule/sftp">{}</mule>"#,
            body
        );
        let doc = Document::parse(&xml).unwrap();
        extract_global_configs(doc.root_element(), &NamespaceTable::mule(), "global.xml")
    }

    #[test]
    fn test_http_listener_defaults() {
        let entries = configs(r#"<http:listener-config name="api"/>"#);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "api");
        assert_eq!(entries[0].file_name, "global.xml");
        assert_eq!(
            entries[0].config,
            GlobalConfig::HttpListener {
                host: "0.0.0.0".to_string(),
                port: "8081".to_string(),
                base_path: "/".to_string(),
            }
        );
    }

    #[test]
    fn test_sftp_connection_fields() {
        let entries = configs(
            r#"<sftp:config name="sftp"><sftp:connection host="files.example.com" username="svc"/></sftp:config>"#,
        );
        assert_eq!(
            entries[0].config,
            GlobalConfig::Sftp {
                host: "files.example.com".to_string(),
                port: "22".to_string(),
                username: "svc".to_string(),
            }
        );
    }

    #[test]
    fn test_file_and_request_configs_in_document_order() {
        let entries = configs(
            r#"<file:config name="files"><file:connection workingDir="/data"/></file:config>
               <http:request-config name="backend" basePath="/v1">
                 <http:request-connection host="backend.local" protocol="HTTPS"/>
               </http:request-config>
               <http:listener-config/>"#,
        );
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["files", "backend", UNNAMED_CONFIG]);
        assert_eq!(
            entries[0].config,
            GlobalConfig::File {
                working_directory: "/data".to_string()
            }
        );
        assert_eq!(
            entries[1].config,
            GlobalConfig::HttpRequest {
                host: "backend.local".to_string(),
                port: "80".to_string(),
                protocol: "HTTPS".to_string(),
                base_path: "/v1".to_string(),
            }
        );
    }
}
