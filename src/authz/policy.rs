use crate::authz::errors::AuthzError;
use crate::authz::types::*;
use kdl::KdlDocument;

/// Parse a KDL bootstrap document into ACL and evaluator definitions.
///
/// ACI strings are kept verbatim here; they are parsed and checked against
/// the declared rights when the policies are compiled.
pub fn parse_kdl_document(source: &str) -> Result<ParsedPolicy, AuthzError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| AuthzError::KdlParse(e.to_string()))?;

    let mut policy = ParsedPolicy::default();

    for node in doc.nodes() {
        match node.name().value() {
            "acl" => {
                let name = first_string_arg(node).ok_or_else(|| {
                    AuthzError::InvalidPolicy(
                        "acl node requires a string argument (e.g. acl \"certServer.ca.certificate\")"
                            .into(),
                    )
                })?;

                let mut def = AclDefinition {
                    name,
                    ..Default::default()
                };

                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        match child.name().value() {
                            "description" => {
                                def.description = first_string_arg(child);
                            }
                            "rights" => {
                                def.rights = dash_list(child);
                            }
                            "aci" => {
                                let aci = first_string_arg(child).ok_or_else(|| {
                                    AuthzError::InvalidPolicy(format!(
                                        "aci in acl `{}` requires a string argument",
                                        def.name
                                    ))
                                })?;
                                def.acis.push(aci);
                            }
                            other => {
                                return Err(AuthzError::InvalidPolicy(format!(
                                    "unexpected child `{other}` in acl `{}` (expected `description`, `rights` or `aci`)",
                                    def.name
                                )));
                            }
                        }
                    }
                }

                if def.rights.is_empty() {
                    return Err(AuthzError::InvalidPolicy(format!(
                        "acl `{}` declares no rights",
                        def.name
                    )));
                }

                policy.acls.push(def);
            }
            "evaluator" => {
                let evaluator_type = first_string_arg(node).ok_or_else(|| {
                    AuthzError::InvalidPolicy(
                        "evaluator node requires a type argument (e.g. evaluator \"group\" implementation=\"group\")"
                            .into(),
                    )
                })?;

                let implementation = node
                    .get("implementation")
                    .and_then(|v| v.as_string())
                    .unwrap_or(evaluator_type.as_str())
                    .to_string();

                policy.evaluators.push(EvaluatorDefinition {
                    evaluator_type,
                    implementation,
                });
            }
            other => {
                tracing::warn!("ignoring unknown top-level KDL node `{other}`");
            }
        }
    }

    Ok(policy)
}

/// Extract the first string argument from a KDL node.
fn first_string_arg(node: &kdl::KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// Extract dash-list children: nodes named "-" whose first argument is a string.
/// Example KDL:
/// ```kdl
/// rights {
///     - "read"
///     - "modify"
/// }
/// ```
fn dash_list(node: &kdl::KdlNode) -> Vec<String> {
    let Some(children) = node.children() else {
        return Vec::new();
    };
    children
        .nodes()
        .iter()
        .filter(|n| n.name().value() == "-")
        .filter_map(|n| first_string_arg(n))
        .collect()
}
