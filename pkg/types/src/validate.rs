use anyhow::{Result, bail};

use crate::rbac::{GlobalRole, GlobalRoleBinding};

/// Validate a Kubernetes-style resource name.
/// Rules: lowercase `[a-z0-9-]`, max 63 chars, no leading/trailing hyphens.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > 63 {
        bail!("name '{}' exceeds 63 characters (got {})", name, name.len());
    }
    if name.starts_with('-') || name.ends_with('-') {
        bail!("name '{}' must not start or end with a hyphen", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        bail!(
            "name '{}' must contain only lowercase letters, digits, and hyphens [a-z0-9-]",
            name
        );
    }
    Ok(())
}

pub fn validate_global_role(gr: &GlobalRole) -> Result<()> {
    validate_name(&gr.name)?;
    for role in &gr.inherited_cluster_roles {
        if let Err(e) = validate_name(role) {
            bail!("globalrole '{}': inherited cluster role: {}", gr.name, e);
        }
    }
    Ok(())
}

/// The reconciler assumes a bound role and a non-empty principal; reject
/// bindings that break that before they are stored.
pub fn validate_global_role_binding(grb: &GlobalRoleBinding) -> Result<()> {
    validate_name(&grb.name)?;
    if grb.global_role_name.is_empty() {
        bail!("globalrolebinding '{}': globalRoleName must be set", grb.name);
    }
    if grb.principal.name().is_empty() {
        bail!("globalrolebinding '{}': principal name must be set", grb.name);
    }
    if grb.uid.is_empty() {
        bail!("globalrolebinding '{}': uid must be set", grb.name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::Principal;
    use chrono::Utc;

    #[test]
    fn valid_names() {
        assert!(validate_name("local").is_ok());
        assert!(validate_name("c-m-8fj2x").is_ok());
        assert!(validate_name("test-grb").is_ok());
        assert!(validate_name("a").is_ok());
    }

    #[test]
    fn invalid_names() {
        assert!(validate_name("").is_err());
        assert!(validate_name("Test-GRB").is_err());
        assert!(validate_name("grb_1").is_err());
        assert!(validate_name("-leading").is_err());
        assert!(validate_name("trailing-").is_err());
        assert!(validate_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn global_role_checks_inherited_roles() {
        let mut gr = GlobalRole {
            name: "inherit-test-gr".to_string(),
            display_name: None,
            inherited_cluster_roles: vec!["cluster-owner".to_string()],
        };
        assert!(validate_global_role(&gr).is_ok());
        gr.inherited_cluster_roles.push("Cluster Owner".to_string());
        assert!(validate_global_role(&gr).is_err());
    }

    #[test]
    fn global_role_binding_requires_role_and_principal() {
        let mut grb = GlobalRoleBinding {
            name: "test-grb".to_string(),
            uid: "1234".to_string(),
            global_role_name: "inherit-test-gr".to_string(),
            principal: Principal::User("test-user".to_string()),
            created_at: Utc::now(),
        };
        assert!(validate_global_role_binding(&grb).is_ok());

        grb.principal = Principal::Group(String::new());
        assert!(validate_global_role_binding(&grb).is_err());

        grb.principal = Principal::Group("okta_group://admins".to_string());
        grb.global_role_name.clear();
        assert!(validate_global_role_binding(&grb).is_err());
    }
}
