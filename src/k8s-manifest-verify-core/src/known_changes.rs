//! Bundled table of fields the cluster is known to change on its own.
//!
//! The table ships inside the binary and is parsed once on first use. A
//! table that fails to parse is treated as empty; verification never fails
//! because of it.

use std::sync::OnceLock;

use tracing::{debug, warn};

use crate::binding::ObjectFieldBindingList;
use crate::config::VerifyResourceOption;
use crate::error::VerifyError;

const KNOWN_CHANGES_YAML: &str = include_str!("../resources/known-changes.yaml");

static KNOWN_IGNORE_FIELDS: OnceLock<ObjectFieldBindingList> = OnceLock::new();

/// The bundled table as YAML.
#[must_use]
pub fn known_changes_yaml() -> &'static str {
    KNOWN_CHANGES_YAML
}

/// Parse a known-changes document (the `ignoreFields:` option shape).
pub fn parse_known_changes(bytes: &[u8]) -> Result<ObjectFieldBindingList, VerifyError> {
    VerifyResourceOption::from_yaml_bytes(bytes).map(|option| option.ignore_fields)
}

fn load_or_empty(bytes: &[u8]) -> ObjectFieldBindingList {
    match parse_known_changes(bytes) {
        Ok(table) => {
            debug!(bindings = table.len(), "Loaded known-changes table");
            table
        },
        Err(e) => {
            warn!(error = %e, "Known-changes table failed to parse, using an empty table");
            ObjectFieldBindingList::default()
        },
    }
}

/// Field bindings from the bundled table.
pub fn known_k8s_ignore_fields() -> &'static ObjectFieldBindingList {
    KNOWN_IGNORE_FIELDS.get_or_init(|| load_or_empty(KNOWN_CHANGES_YAML.as_bytes()))
}
