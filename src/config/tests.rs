//! Configuration validation and parsing tests.

use super::*;
use crate::test_support::EnvGuard;
use rstest::{fixture, rstest};

#[fixture]
fn scaleway() -> ScalewayConfig {
    ScalewayConfig {
        access_key: Some(String::from("SCWACCESS")),
        secret_key: Some(String::from("secret")),
        project_id: Some(String::from("project-1")),
        organization_id: None,
        region: String::from("fr-par"),
        zone: String::from("fr-par-1"),
        instance_type: String::from("DEV1-M"),
        instance_image: String::new(),
        instance_name: String::from("dock-env"),
    }
}

#[fixture]
fn dock() -> DockConfig {
    DockConfig {
        provider: String::from("scaleway"),
        ssh_public_key_path: String::from("/keys/id.pub"),
        ssh_private_key_path: String::from("/keys/id"),
        ssh_user: String::from("root"),
        kubernetes_engine: String::from("k3s"),
        use_reserved_ip: false,
        forward_ports: String::from(DEFAULT_FORWARD_PORTS),
        ssh_max_startups: String::from("100:30:200"),
        ssh_max_sessions: 100,
        auto_pilot: String::from("true"),
        scw_bin: String::from("scw"),
        doctl_bin: String::from("doctl"),
        terraform_bin: String::from("terraform"),
        ssh_bin: String::from("ssh"),
        scp_bin: String::from("scp"),
    }
}

#[rstest]
fn credentials_default_organization_to_project(scaleway: ScalewayConfig) {
    let creds = scaleway.credentials().expect("credentials should validate");
    assert_eq!(creds.organization_id, "project-1");
    assert_eq!(creds.access_key, "SCWACCESS");
}

#[rstest]
fn credentials_keep_explicit_organization(scaleway: ScalewayConfig) {
    let cfg = ScalewayConfig {
        organization_id: Some(String::from("org-9")),
        ..scaleway
    };
    assert_eq!(cfg.credentials().expect("credentials").organization_id, "org-9");
}

#[rstest]
#[case::access_key("SCW_ACCESS_KEY")]
#[case::secret_key("SCW_SECRET_KEY")]
#[case::project("SCW_PROJECT_ID")]
fn missing_credentials_name_the_env_var(scaleway: ScalewayConfig, #[case] env_var: &str) {
    let mut cfg = scaleway;
    match env_var {
        "SCW_ACCESS_KEY" => cfg.access_key = Some(String::from("  ")),
        "SCW_SECRET_KEY" => cfg.secret_key = None,
        _ => cfg.project_id = None,
    }
    let err = cfg.credentials().expect_err("missing credential should fail");
    let ConfigError::MissingField(message) = err else {
        panic!("expected MissingField, got {err:?}");
    };
    assert!(message.contains(env_var), "message should mention {env_var}: {message}");
    assert!(message.contains("[scaleway] in dock.toml"));
}

#[rstest]
fn digitalocean_token_is_required() {
    let cfg = DigitalOceanConfig {
        token: None,
        region: String::from("nyc1"),
        droplet_size: String::from("s-2vcpu-4gb"),
        droplet_name: String::from("dock-env"),
    };
    let err = cfg.require_token().expect_err("token should be required");
    assert!(err.to_string().contains("DO_TOKEN"));
}

#[rstest]
#[case("scaleway", ProviderKind::Scaleway)]
#[case("SCW", ProviderKind::Scaleway)]
#[case("digitalocean", ProviderKind::DigitalOcean)]
#[case(" do ", ProviderKind::DigitalOcean)]
fn provider_kind_parses_aliases(#[case] raw: &str, #[case] expected: ProviderKind) {
    assert_eq!(raw.parse::<ProviderKind>().expect("provider"), expected);
}

#[rstest]
fn unknown_provider_is_rejected(dock: DockConfig) {
    let cfg = DockConfig {
        provider: String::from("aws"),
        ..dock
    };
    assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
}

#[rstest]
fn unknown_kubernetes_engine_is_rejected(dock: DockConfig) {
    let cfg = DockConfig {
        kubernetes_engine: String::from("minikube"),
        ..dock
    };
    let err = cfg.validate().expect_err("engine should be validated");
    assert!(err.to_string().contains("minikube"));
}

#[rstest]
#[case("8080,3000", vec![8080, 3000])]
#[case(" 22 , ,443 ", vec![22, 443])]
#[case("0,abc,70000,5432", vec![5432])]
#[case("", vec![])]
fn port_lists_drop_invalid_entries(#[case] raw: &str, #[case] expected: Vec<u16>) {
    assert_eq!(parse_port_list(raw), expected);
}

#[rstest]
#[case("true", true)]
#[case("TRUE", true)]
#[case("1", true)]
#[case("false", false)]
#[case("0", false)]
#[case("yes", false)]
fn auto_pilot_flag_accepts_true_or_one(
    dock: DockConfig,
    #[case] raw: &str,
    #[case] expected: bool,
) {
    let cfg = DockConfig {
        auto_pilot: raw.to_owned(),
        ..dock
    };
    assert_eq!(cfg.auto_pilot_enabled(), expected);
}

#[rstest]
fn absolute_paths_are_not_expanded() {
    assert_eq!(expand_home("/etc/key"), "/etc/key");
    assert!(!expand_home("~/.ssh/id").starts_with('~'));
}

#[tokio::test]
async fn env_file_does_not_override_existing_variables() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let path = Utf8PathBuf::from_path_buf(tmp.path().join(".env")).expect("utf8 path");
    std::fs::write(
        &path,
        "DOCK_TEST_ENV_KEEP=from-file\nDOCK_TEST_ENV_NEW=\"quoted value\"\n",
    )
    .expect("write env file");

    let _guard = EnvGuard::apply(&[("DOCK_TEST_ENV_KEEP", "from-process")], &["DOCK_TEST_ENV_NEW"])
        .await;
    assert!(load_env_file(&path).expect("env file should load"));

    assert_eq!(
        std::env::var("DOCK_TEST_ENV_KEEP").as_deref(),
        Ok("from-process")
    );
    assert_eq!(std::env::var("DOCK_TEST_ENV_NEW").as_deref(), Ok("quoted value"));
}

#[rstest]
fn missing_env_file_is_not_an_error() {
    let path = Utf8PathBuf::from("/nonexistent/dock/.env");
    assert!(!load_env_file(&path).expect("missing file is fine"));
}

#[tokio::test]
async fn scaleway_config_layers_env_over_defaults() {
    let _guard =
        EnvGuard::set_vars(&[("SCW_ZONE", "nl-ams-1"), ("SCW_SECRET_KEY", "s3cret")]).await;

    let cfg = ScalewayConfig::load_without_cli_args().expect("config should load");

    assert_eq!(cfg.zone, "nl-ams-1");
    assert_eq!(cfg.secret_key.as_deref(), Some("s3cret"));
    assert_eq!(cfg.instance_type, "DEV1-M");
}
