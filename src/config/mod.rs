//! Configuration: the optional settings file and where cluster credentials come from

#[allow(clippy::module_inception)]
mod config;

pub use config::{
    default_kubeconfig_path, ClusterSource, ReadinessSection, Settings, TunnelSection,
    CONFIG_DIR_ENV,
};
