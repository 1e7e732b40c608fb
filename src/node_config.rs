use std::collections::BTreeMap;

use serde::Deserialize;

use crate::{Error, Result};

/// One node's entry in the config secret, in the k3OS `config.yaml` shape.
/// Only the sections this operator acts on are modeled; unknown fields in
/// the blob are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub k3os: K3osSection,
    /// Raw bytes of the blob, kept verbatim for mirroring to disk.
    #[serde(skip)]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct K3osSection {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: Vec<String>,
}

impl NodeConfig {
    /// Parses a node's config blob. Empty data is an error: a node listed in
    /// the secret is expected to carry a config.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::EmptyNodeConfig);
        }
        let mut config: NodeConfig = serde_yaml::from_slice(data)?;
        config.data = data.to_vec();
        Ok(config)
    }
}
