//! Command implementations.
//!
//! Every command restores a logged [`DeviceSnapshot`] into a shadow engine
//! backed by a [`RecordingBackend`] and answers from the shadow. Nothing
//! reaches hardware.

use anyhow::{anyhow, bail, Context, Result};
use bf_mc::{
    DeviceSnapshot, EcmpHdl, McMgr, McMgrConfig, MgrpHdl, PacketTags, RecordingBackend,
    SessionHandle,
};
use bf_types::{DevId, LagId, PipeBitmap};
use serde::Serialize;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Device id the snapshot is restored under.
const SHADOW_DEV: DevId = DevId(0);

/// Loads the manager configuration. Missing fields take their defaults.
pub fn load_config(path: Option<&Path>) -> Result<McMgrConfig> {
    let Some(path) = path else {
        return Ok(McMgrConfig::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: McMgrConfig = serde_yaml::from_str(&text)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Reads a state document. YAML and JSON are both accepted.
pub fn load_snapshot(path: &Path) -> Result<DeviceSnapshot> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read state {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("failed to parse state {}", path.display()))
}

/// A restored shadow engine.
pub struct Shadow {
    pub mgr: McMgr,
    pub backend: Arc<RecordingBackend>,
    pub sess: SessionHandle,
}

impl Shadow {
    pub fn restore(config: McMgrConfig, snapshot: &DeviceSnapshot) -> Result<Self> {
        let backend = Arc::new(RecordingBackend::new());
        let mut mgr = McMgr::new(config, backend.clone())?;
        mgr.device_add(SHADOW_DEV, snapshot.config.clone())?;
        let sess = mgr.session_create()?;
        mgr.restore_state(sess, SHADOW_DEV, snapshot)
            .context("failed to restore state")?;
        info!(
            groups = snapshot.groups.len(),
            nodes = snapshot.nodes.len(),
            ecmps = snapshot.ecmps.len(),
            "restored shadow state"
        );
        Ok(Self { mgr, backend, sess })
    }

    pub fn open(config: McMgrConfig, state: &Path) -> Result<Self> {
        Self::restore(config, &load_snapshot(state)?)
    }

    /// Group handle for a hardware group id.
    fn group(&self, group_id: u16) -> Result<MgrpHdl> {
        for mgrp in self.mgr.iter_mgrps(self.sess, SHADOW_DEV)? {
            if self.mgr.mgrp_get_attr(self.sess, SHADOW_DEV, mgrp)? == group_id {
                return Ok(mgrp);
            }
        }
        bail!("no multicast group with id {}", group_id)
    }
}

/// Parses a raw ECMP handle, decimal or `0x` prefixed hex.
pub fn parse_ecmp(s: &str) -> Result<EcmpHdl> {
    let raw = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .with_context(|| format!("invalid handle {:?}", s))?;
    EcmpHdl::from_raw(raw).ok_or_else(|| anyhow!("{:#010x} is not an ecmp handle", raw))
}

fn pipe_list(pipes: PipeBitmap) -> Vec<u32> {
    pipes.iter().map(|p| p.as_u32()).collect()
}

#[derive(Debug, Serialize)]
struct GroupSummary {
    group_id: u16,
    handle: String,
    pipes: Vec<u32>,
    nodes: usize,
    ecmps: usize,
}

pub fn show(shadow: &Shadow) -> Result<Value> {
    let (mgr, sess) = (&shadow.mgr, shadow.sess);
    let mut groups = Vec::new();
    for mgrp in mgr.iter_mgrps(sess, SHADOW_DEV)? {
        groups.push(GroupSummary {
            group_id: mgr.mgrp_get_attr(sess, SHADOW_DEV, mgrp)?,
            handle: format!("{:#010x}", mgrp.as_raw()),
            pipes: pipe_list(mgr.pipe_vector(sess, SHADOW_DEV, mgrp)?),
            nodes: mgr.mgrp_get_node_mbr_count(sess, SHADOW_DEV, mgrp)?,
            ecmps: mgr.mgrp_get_ecmp_mbr_count(sess, SHADOW_DEV, mgrp)?,
        });
    }
    let snapshot = mgr.log_state(sess, SHADOW_DEV)?;
    Ok(json!({
        "groups": groups,
        "nodes": mgr.node_get_count(sess, SHADOW_DEV)?,
        "ecmps": mgr.ecmp_get_count(sess, SHADOW_DEV)?,
        "lags": snapshot.lags.len(),
        "prune_masks": snapshot.prune.len(),
        "global_rid": snapshot.global_rid,
        "fast_failover": snapshot.fast_failover,
        "protection": snapshot.protection,
    }))
}

pub fn pipe_vector(shadow: &Shadow, group_id: u16) -> Result<Value> {
    let mgrp = shadow.group(group_id)?;
    let pipes = shadow.mgr.pipe_vector(shadow.sess, SHADOW_DEV, mgrp)?;
    Ok(json!({ "group": group_id, "pipes": pipe_list(pipes) }))
}

pub fn select_ecmp(
    shadow: &Shadow,
    group_id: u16,
    ecmp: EcmpHdl,
    hash: u16,
    xid: u16,
) -> Result<Value> {
    let mgrp = shadow.group(group_id)?;
    let selection = shadow
        .mgr
        .select_ecmp(shadow.sess, SHADOW_DEV, mgrp, ecmp, hash, xid)?;
    debug!(?selection, "ecmp selection");
    Ok(json!({
        "node": selection.node.map(|n| format!("{:#010x}", n.as_raw())),
        "is_pruned": selection.is_pruned,
    }))
}

pub fn select_lag(shadow: &Shadow, lag: u8, hash: u16, tags: PacketTags) -> Result<Value> {
    let selection = shadow
        .mgr
        .select_lag(shadow.sess, SHADOW_DEV, LagId(lag), hash, tags)?;
    Ok(serde_json::to_value(selection)?)
}

pub fn replicate(
    shadow: &Shadow,
    group_id: u16,
    hash1: u16,
    hash2: u16,
    tags: PacketTags,
) -> Result<Value> {
    let mgrp = shadow.group(group_id)?;
    let copies = shadow
        .mgr
        .replicate(shadow.sess, SHADOW_DEV, mgrp, hash1, hash2, tags)?;
    Ok(serde_json::to_value(copies)?)
}

/// Replays the restored state and reports how many writes it took.
pub fn replay(shadow: &mut Shadow) -> Result<Value> {
    let writes = shadow.mgr.replay(shadow.sess, SHADOW_DEV)?;
    let mut by_kind = std::collections::BTreeMap::new();
    for op in shadow.backend.ops() {
        *by_kind.entry(op.name()).or_insert(0usize) += 1;
    }
    Ok(json!({ "writes": writes, "by_kind": by_kind }))
}
