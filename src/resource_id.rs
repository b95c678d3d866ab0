//! Parsing of Azure resource IDs into their constituent segments.
//!
//! A resource id has the shape
//! `/subscriptions/<sub>/resourceGroups/<rg>/providers/<type>/<name>[/<subtype>/<subname>...]`.
//! Parsing is best-effort: a malformed id leaves the corresponding fields
//! empty rather than erroring, since the fetcher must still emit whatever
//! labels it can for a partially-recognizable id.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedResourceId {
    pub subscription: String,
    pub resource_group: String,
    pub resource_name: String,
}

/// Splits `id` on `/` and pulls out the subscription, resource group and
/// resource name segments. The resource name is the last path segment,
/// matching the source exporter's behavior for both top-level resources and
/// nested sub-resources (e.g. `.../providers/Microsoft.Sql/servers/S/databases/D`
/// yields `resource_name = "D"`).
pub fn parse_resource_id(id: &str) -> ParsedResourceId {
    let segments: Vec<&str> = id.split('/').filter(|s| !s.is_empty()).collect();
    let mut parsed = ParsedResourceId::default();

    let mut i = 0;
    while i + 1 < segments.len() {
        match segments[i].to_lowercase().as_str() {
            "subscriptions" => parsed.subscription = segments[i + 1].to_string(),
            "resourcegroups" => parsed.resource_group = segments[i + 1].to_string(),
            _ => {}
        }
        i += 1;
    }

    if let Some(providers_idx) = segments.iter().position(|s| s.eq_ignore_ascii_case("providers")) {
        if segments.len() > providers_idx + 2 {
            parsed.resource_name = segments.last().unwrap().to_string();
        }
    }

    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_top_level_resource() {
        let id = "/subscriptions/SUB1/resourceGroups/RG/providers/Microsoft.KeyVault/vaults/V1";
        let parsed = parse_resource_id(id);
        assert_eq!(parsed.subscription, "SUB1");
        assert_eq!(parsed.resource_group, "RG");
        assert_eq!(parsed.resource_name, "V1");
    }

    #[test]
    fn parses_nested_resource() {
        let id = "/subscriptions/SUB1/resourceGroups/RG/providers/Microsoft.Sql/servers/S/databases/D";
        let parsed = parse_resource_id(id);
        assert_eq!(parsed.resource_name, "D");
    }

    #[test]
    fn malformed_id_leaves_fields_empty() {
        let parsed = parse_resource_id("not-a-resource-id");
        assert_eq!(parsed, ParsedResourceId::default());
    }
}
