//! Predefined device templates.
//!
//! A template bundles everything vendor-specific about a switch family: the
//! prompt state machine used to drive its shell and the `show` commands
//! whose output the parsers understand.

use crate::device::DeviceHandler;
use crate::error::ConnectError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Built-in template names supported by this crate.
pub const BUILTIN_TEMPLATES: &[&str] = &["cisco"];

/// Commands issued on every hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CommandSet {
    pub arp_table: String,
    pub mac_table: String,
    /// `{port}` is replaced with the local port being inspected.
    pub neighbor_detail: String,
}

impl Default for CommandSet {
    fn default() -> Self {
        Self::cisco()
    }
}

impl CommandSet {
    /// IOS `show` commands.
    pub fn cisco() -> Self {
        Self {
            arp_table: "show ip arp".to_string(),
            mac_table: "show mac address-table".to_string(),
            neighbor_detail: "show cdp neighbors {port} detail".to_string(),
        }
    }

    /// Neighbor query for one local port.
    pub fn neighbor_detail_for(&self, port: &str) -> String {
        self.neighbor_detail.replace("{port}", port)
    }
}

/// Metadata for a built-in device template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TemplateMetadata {
    pub name: String,
    pub vendor: String,
    pub family: String,
    pub aliases: Vec<String>,
    pub commands: CommandSet,
}

fn canonical_name(name: &str) -> Option<&'static str> {
    match name.to_ascii_lowercase().as_str() {
        "cisco" | "cisco_ios" | "ios" | "cisco_iosxe" => Some("cisco"),
        _ => None,
    }
}

fn metadata_for(name: &str) -> Option<TemplateMetadata> {
    let meta = match canonical_name(name)? {
        "cisco" => TemplateMetadata {
            name: "cisco".to_string(),
            vendor: "Cisco".to_string(),
            family: "IOS/IOS-XE".to_string(),
            aliases: vec![
                "cisco_ios".to_string(),
                "ios".to_string(),
                "cisco_iosxe".to_string(),
            ],
            commands: CommandSet::cisco(),
        },
        _ => return None,
    };
    Some(meta)
}

/// Returns metadata for all built-in templates.
pub fn template_catalog() -> Vec<TemplateMetadata> {
    BUILTIN_TEMPLATES
        .iter()
        .filter_map(|name| metadata_for(name))
        .collect()
}

/// Returns metadata for one template by name or alias (case-insensitive).
pub fn template_metadata(name: &str) -> Result<TemplateMetadata, ConnectError> {
    metadata_for(name).ok_or_else(|| ConnectError::TemplateNotFound(name.to_string()))
}

/// Returns the per-hop command set for a template.
pub fn commands(name: &str) -> Result<CommandSet, ConnectError> {
    Ok(template_metadata(name)?.commands)
}

/// Builds a fresh prompt state machine for a template.
pub fn by_name(name: &str) -> Result<DeviceHandler, ConnectError> {
    match canonical_name(name) {
        Some("cisco") => cisco(),
        _ => Err(ConnectError::TemplateNotFound(name.to_string())),
    }
}

/// Cisco IOS / IOS-XE switches.
pub fn cisco() -> Result<DeviceHandler, ConnectError> {
    DeviceHandler::new(
        // Prompt
        vec![
            (
                "Config".to_string(),
                vec![r"^(?P<host>[^\s(#>]+)\(\S+\)#\s*$"],
            ),
            ("Enable".to_string(), vec![r"^(?P<host>[^\s#>(]+)#\s*$"]),
            ("Login".to_string(), vec![r"^(?P<host>[^\s<>#(]+)>\s*$"]),
        ],
        // Write (interactive inputs)
        vec![(
            "EnablePassword".to_string(),
            (true, "EnablePassword".to_string(), true),
            vec![r"^\x00*\r?(Enable )?Password:\s*$"],
        )],
        // More regex
        vec![r"^\s*--More--\s*$", r"\s*<--- More --->\s*"],
        // Error regex
        vec![
            r"^% Invalid input detected at '\^' marker\.",
            r"^% Incomplete command\.",
            r"^% Ambiguous command:.*",
            r"^% Unknown command.*",
            r"^% Authorization failed.*",
            r"^% Access denied.*",
            r"^% Bad secrets.*",
            r"^Command authorization failed.*",
            r"^Command rejected:.*",
        ],
        // Edges
        vec![
            (
                "Login".to_string(),
                "enable".to_string(),
                "Enable".to_string(),
            ),
            (
                "Enable".to_string(),
                "configure terminal".to_string(),
                "Config".to_string(),
            ),
            ("Config".to_string(), "end".to_string(), "Enable".to_string()),
            (
                "Enable".to_string(),
                "disable".to_string(),
                "Login".to_string(),
            ),
        ],
        // Ignore errors
        vec![r"^% CDP is not enabled"],
        // Dyn param
        HashMap::new(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn by_name_accepts_aliases_case_insensitively() {
        for name in ["CiScO", "cisco_ios", "IOS"] {
            let handler = by_name(name).expect("cisco template should load");
            assert!(handler.states().contains(&"enable".to_string()));
        }
    }

    #[test]
    fn by_name_returns_template_not_found_for_unknown_name() {
        let err = match by_name("unknown-vendor") {
            Ok(_) => panic!("unknown template should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, ConnectError::TemplateNotFound(_)));
        assert!(matches!(
            commands("unknown-vendor"),
            Err(ConnectError::TemplateNotFound(_))
        ));
    }

    #[test]
    fn template_catalog_has_metadata_for_all_builtin_templates() {
        let catalog = template_catalog();
        assert_eq!(catalog.len(), BUILTIN_TEMPLATES.len());
        assert_eq!(catalog[0].name, "cisco");
        assert_eq!(catalog[0].vendor, "Cisco");
    }

    #[test]
    fn neighbor_command_is_scoped_to_port() {
        let commands = commands("cisco").expect("commands");
        assert_eq!(commands.arp_table, "show ip arp");
        assert_eq!(commands.mac_table, "show mac address-table");
        assert_eq!(
            commands.neighbor_detail_for("Gi0/1"),
            "show cdp neighbors Gi0/1 detail"
        );
    }

    #[test]
    fn cisco_prompts_capture_hostname_and_mode() {
        let mut handler = cisco().expect("cisco");

        handler.read("SW1>");
        assert_eq!(handler.current_state(), "login");
        assert_eq!(handler.hostname(), Some("SW1"));

        handler.read("SW1#");
        assert_eq!(handler.current_state(), "enable");

        handler.read("access-sw-3(config-if)#");
        assert_eq!(handler.current_state(), "config");
        assert_eq!(handler.hostname(), Some("access-sw-3"));
    }

    #[test]
    fn cisco_login_reaches_enable_with_one_command() {
        let mut handler = cisco().expect("cisco");
        handler.read("SW1>");
        let path = handler.trans_state_write("Enable").expect("path");
        assert_eq!(path, vec![("enable".to_string(), "enable".to_string())]);
    }

    #[test]
    fn cisco_flags_invalid_input_and_asks_for_enable_secret() {
        let mut handler = cisco().expect("cisco");
        handler.read("% Invalid input detected at '^' marker.");
        assert!(handler.error());

        handler
            .dyn_param
            .insert("EnablePassword".to_string(), "s3cret\n".to_string());
        assert_eq!(
            handler.read_need_write("Password: "),
            Some(("s3cret\n".to_string(), true))
        );
        assert_eq!(
            handler.read_need_write(" --More-- "),
            Some((" ".to_string(), false))
        );
    }

    #[test]
    fn disabled_cdp_is_not_an_error() {
        let mut handler = cisco().expect("cisco");
        handler.read("% CDP is not enabled");
        assert!(!handler.error());
    }

    #[test]
    fn arp_and_mac_rows_are_plain_output() {
        let mut handler = cisco().expect("cisco");
        handler.read("Internet  192.168.1.50   3   0011.2233.4455  ARPA   Vlan1");
        assert_eq!(handler.current_state(), "output");
        handler.read("   1    0011.2233.4455    DYNAMIC     Gi0/1");
        assert_eq!(handler.current_state(), "output");
    }
}
