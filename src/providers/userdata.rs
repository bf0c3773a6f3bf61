//! Instance userdata per image family
//!
//! Each [`ImageFamily`] maps to a [`Bootstrap`] strategy producing the script
//! that joins the node to the cluster. The launch metadata carries it base64
//! encoded.

use crate::crd::{ImageFamily, KubeletConfiguration};
use crate::error::{ProviderError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use k8s_openapi::api::core::v1::Taint;
use std::collections::BTreeMap;

/// Cluster and node settings a bootstrap script needs.
#[derive(Debug, Clone, Default)]
pub struct BootstrapOptions {
    pub cluster_name: String,
    pub cluster_endpoint: String,
    /// Base64 PEM bundle
    pub cluster_ca_bundle: String,
    pub kubelet: KubeletConfiguration,
    pub labels: BTreeMap<String, String>,
    pub taints: Vec<Taint>,
    pub custom_user_data: Option<String>,
}

pub trait Bootstrap: Send + Sync {
    fn script(&self, options: &BootstrapOptions) -> Result<String>;
}

/// Oracle Linux OKE images ship `oke-install.sh`.
pub struct Oke;

/// Ubuntu images joined with a kubelet bootstrap helper.
pub struct Ubuntu;

/// User-supplied userdata, passed through unchanged.
pub struct Custom;

pub fn strategy(family: ImageFamily) -> &'static dyn Bootstrap {
    match family {
        ImageFamily::Oke => &Oke,
        ImageFamily::Ubuntu => &Ubuntu,
        ImageFamily::Custom => &Custom,
    }
}

/// Script for `family`, base64 encoded for instance metadata.
pub fn encoded(family: ImageFamily, options: &BootstrapOptions) -> Result<String> {
    Ok(BASE64.encode(strategy(family).script(options)?))
}

fn require_endpoint(options: &BootstrapOptions) -> Result<()> {
    if options.cluster_endpoint.is_empty() {
        return Err(ProviderError::Configuration(
            "cluster endpoint is required to bootstrap nodes".to_string(),
        ));
    }
    Ok(())
}

/// Single-quote `s` for a POSIX shell.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn format_taint(taint: &Taint) -> String {
    match &taint.value {
        Some(value) => format!("{}={}:{}", taint.key, value, taint.effect),
        None => format!("{}:{}", taint.key, taint.effect),
    }
}

fn join_pairs(pairs: &BTreeMap<String, String>, separator: &str) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}{}{}", k, separator, v))
        .collect::<Vec<_>>()
        .join(",")
}

fn kubelet_args(options: &BootstrapOptions) -> String {
    let kubelet = &options.kubelet;
    let mut args = Vec::new();
    if !options.labels.is_empty() {
        args.push(format!("--node-labels={}", join_pairs(&options.labels, "=")));
    }
    if !options.taints.is_empty() {
        let taints: Vec<String> = options.taints.iter().map(format_taint).collect();
        args.push(format!("--register-with-taints={}", taints.join(",")));
    }
    if let Some(max_pods) = kubelet.max_pods {
        args.push(format!("--max-pods={}", max_pods));
    }
    if let Some(pods_per_core) = kubelet.pods_per_core {
        args.push(format!("--pods-per-core={}", pods_per_core));
    }
    if !kubelet.cluster_dns.is_empty() {
        args.push(format!("--cluster-dns={}", kubelet.cluster_dns.join(",")));
    }
    if !kubelet.system_reserved.is_empty() {
        args.push(format!("--system-reserved={}", join_pairs(&kubelet.system_reserved, "=")));
    }
    if !kubelet.kube_reserved.is_empty() {
        args.push(format!("--kube-reserved={}", join_pairs(&kubelet.kube_reserved, "=")));
    }
    if !kubelet.eviction_hard.is_empty() {
        args.push(format!("--eviction-hard={}", join_pairs(&kubelet.eviction_hard, "<")));
    }
    args.join(" ")
}

fn append_custom(script: String, options: &BootstrapOptions) -> String {
    match &options.custom_user_data {
        Some(extra) if !extra.trim().is_empty() => format!("{}\n{}\n", script, extra.trim_end()),
        _ => script,
    }
}

impl Bootstrap for Oke {
    fn script(&self, options: &BootstrapOptions) -> Result<String> {
        require_endpoint(options)?;
        let script = format!(
            "#!/usr/bin/env bash\n\
             set -o errexit\n\
             bash /etc/oke/oke-install.sh \\\n  \
             --apiserver-endpoint {} \\\n  \
             --kubelet-ca-cert {} \\\n  \
             --kubelet-extra-args {}\n",
            shell_quote(&options.cluster_endpoint),
            shell_quote(&options.cluster_ca_bundle),
            shell_quote(&kubelet_args(options))
        );
        Ok(append_custom(script, options))
    }
}

impl Bootstrap for Ubuntu {
    fn script(&self, options: &BootstrapOptions) -> Result<String> {
        require_endpoint(options)?;
        let script = format!(
            "#!/bin/bash\n\
             set -o errexit\n\
             /usr/local/bin/bootstrap-kubelet \\\n  \
             --cluster-name {} \\\n  \
             --apiserver-endpoint {} \\\n  \
             --b64-cluster-ca {} \\\n  \
             --kubelet-extra-args {}\n",
            shell_quote(&options.cluster_name),
            shell_quote(&options.cluster_endpoint),
            shell_quote(&options.cluster_ca_bundle),
            shell_quote(&kubelet_args(options))
        );
        Ok(append_custom(script, options))
    }
}

impl Bootstrap for Custom {
    fn script(&self, options: &BootstrapOptions) -> Result<String> {
        options
            .custom_user_data
            .clone()
            .ok_or_else(|| ProviderError::Configuration("Custom image family requires userData".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> BootstrapOptions {
        BootstrapOptions {
            cluster_name: "prod".to_string(),
            cluster_endpoint: "https://10.0.0.10:6443".to_string(),
            cluster_ca_bundle: "Q0E=".to_string(),
            kubelet: KubeletConfiguration {
                max_pods: Some(31),
                eviction_hard: [("memory.available".to_string(), "5%".to_string())].into(),
                ..Default::default()
            },
            labels: [("karpenter.sh/nodepool".to_string(), "default".to_string())].into(),
            taints: vec![Taint {
                key: "dedicated".to_string(),
                value: Some("gpu".to_string()),
                effect: "NoSchedule".to_string(),
                time_added: None,
            }],
            custom_user_data: None,
        }
    }

    #[test]
    fn test_oke_script() {
        let script = strategy(ImageFamily::Oke).script(&options()).unwrap();
        assert!(script.starts_with("#!/usr/bin/env bash"));
        assert!(script.contains("--apiserver-endpoint 'https://10.0.0.10:6443'"));
        assert!(script.contains("--node-labels=karpenter.sh/nodepool=default"));
        assert!(script.contains("--register-with-taints=dedicated=gpu:NoSchedule"));
        assert!(script.contains("--max-pods=31"));
        assert!(script.contains("--eviction-hard=memory.available<5%"));
    }

    #[test]
    fn test_ubuntu_appends_custom_userdata() {
        let mut opts = options();
        opts.custom_user_data = Some("echo done".to_string());
        let script = strategy(ImageFamily::Ubuntu).script(&opts).unwrap();
        assert!(script.contains("--cluster-name 'prod'"));
        assert!(script.trim_end().ends_with("echo done"));
    }

    #[test]
    fn test_single_quotes_are_escaped() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");

        let mut opts = options();
        opts.labels.insert("team".to_string(), "o'brien; rm -rf /".to_string());
        let script = strategy(ImageFamily::Oke).script(&opts).unwrap();
        assert!(script.contains(r"team=o'\''brien; rm -rf / --register"));
        assert!(!script.contains("team=o'brien"));
    }

    #[test]
    fn test_custom_passthrough() {
        let mut opts = options();
        assert!(strategy(ImageFamily::Custom).script(&opts).is_err());
        opts.custom_user_data = Some("#cloud-config\n".to_string());
        assert_eq!(
            strategy(ImageFamily::Custom).script(&opts).unwrap(),
            "#cloud-config\n"
        );
    }

    #[test]
    fn test_encoded_is_base64() {
        let encoded = encoded(ImageFamily::Oke, &options()).unwrap();
        let decoded = BASE64.decode(encoded).unwrap();
        assert!(String::from_utf8(decoded).unwrap().contains("oke-install.sh"));
    }

    #[test]
    fn test_missing_endpoint() {
        let mut opts = options();
        opts.cluster_endpoint.clear();
        assert!(matches!(
            strategy(ImageFamily::Oke).script(&opts),
            Err(ProviderError::Configuration(_))
        ));
    }
}
