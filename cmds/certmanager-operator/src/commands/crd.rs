//! CRD command handler.
//!
//! Prints the `CertManager` CustomResourceDefinition so it can be installed with
//! `kubectl apply -f -` before the operator starts.

use std::io::Write;

use anyhow::{Context, Result};
use clap::Args;
use kube::CustomResourceExt;

use crate::crd::CertManager;

#[derive(Args)]
pub struct CrdArgs {}

pub fn run<W: Write>(_args: CrdArgs, mut writer: W) -> Result<()> {
	let yaml = serde_yaml::to_string(&CertManager::crd()).context("serializing CRD")?;
	writer.write_all(yaml.as_bytes())?;
	Ok(())
}
