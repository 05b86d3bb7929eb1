//! C ABI over a per-thread manager instance.
//!
//! Every function returns a `bf_status_t` compatible code (see
//! [`McStatus`]). Handles cross the boundary as raw `u32` values, with
//! `0xFFFF_FFFF` as the invalid sentinel. Port and LAG bitmaps are passed as
//! 36 and 32 byte arrays.

use crate::config::McMgrConfig;
use crate::error::{McError, McResult, McStatus};
use crate::handle::{McHandle, McObjectKind, RawMcHandle, SessionHandle};
use crate::hw::NullBackend;
use crate::mgr::McMgr;
use crate::select::PacketTags;
use bf_types::{
    DevId, DevPort, LagBitmap, LagId, PortBitmap, BF_MC_LAG_ARRAY_SIZE, BF_MC_PORT_ARRAY_SIZE,
};
use std::cell::RefCell;
use std::sync::Arc;

/// Written to port outputs when no local port was selected.
pub const BF_MC_INVALID_PORT: u16 = u16::MAX;

thread_local! {
    static MC_MGR: RefCell<Option<Box<McMgr>>> = const { RefCell::new(None) };
}

fn status(result: McResult<()>) -> i32 {
    match result {
        Ok(()) => McStatus::Success as i32,
        Err(e) => e.status() as i32,
    }
}

fn with_mgr<F>(f: F) -> i32
where
    F: FnOnce(&mut McMgr) -> McResult<()>,
{
    MC_MGR.with(|mgr| match mgr.borrow_mut().as_mut() {
        Some(mgr) => status(f(mgr)),
        None => McStatus::NotReady as i32,
    })
}

fn handle<K: McObjectKind>(raw: RawMcHandle) -> McResult<McHandle<K>> {
    McHandle::from_raw(raw)
        .ok_or_else(|| McError::invalid_arg(format!("{:#010x} is not a {} handle", raw, K::type_name())))
}

fn out<'a, T>(ptr: *mut T) -> McResult<&'a mut T> {
    // SAFETY: callers pass either null or a pointer to writable storage for T.
    unsafe { ptr.as_mut() }.ok_or_else(|| McError::invalid_arg("null output pointer"))
}

fn port_map(ptr: *const u8) -> McResult<PortBitmap> {
    if ptr.is_null() {
        return Err(McError::invalid_arg("null port map"));
    }
    // SAFETY: the C interface defines the port map as BF_MC_PORT_ARRAY_SIZE bytes.
    let bytes = unsafe { std::slice::from_raw_parts(ptr, BF_MC_PORT_ARRAY_SIZE) };
    Ok(PortBitmap::from_bytes(bytes)?)
}

fn lag_map(ptr: *const u8) -> McResult<LagBitmap> {
    if ptr.is_null() {
        return Err(McError::invalid_arg("null lag map"));
    }
    // SAFETY: the C interface defines the LAG map as BF_MC_LAG_ARRAY_SIZE bytes.
    let bytes = unsafe { std::slice::from_raw_parts(ptr, BF_MC_LAG_ARRAY_SIZE) };
    Ok(LagBitmap::from_bytes(bytes)?)
}

/// Fills `size` slots at `ptr` with `handles`, padding with the invalid
/// sentinel.
fn fill_handles<K: McObjectKind>(ptr: *mut u32, size: u32, handles: &[McHandle<K>]) -> McResult<()> {
    if ptr.is_null() {
        return Err(McError::invalid_arg("null output array"));
    }
    // SAFETY: the caller provides room for `size` handles.
    let slots = unsafe { std::slice::from_raw_parts_mut(ptr, size as usize) };
    for (i, slot) in slots.iter_mut().enumerate() {
        *slot = handles.get(i).map_or(u32::MAX, McHandle::as_raw);
    }
    Ok(())
}

#[no_mangle]
pub extern "C" fn bf_mc_init(max_sessions: u32) -> i32 {
    MC_MGR.with(|mgr| {
        if mgr.borrow().is_some() {
            return McStatus::AlreadyExists as i32;
        }
        let config = McMgrConfig {
            max_sessions,
            ..McMgrConfig::default()
        };
        match McMgr::new(config, Arc::new(NullBackend)) {
            Ok(m) => {
                *mgr.borrow_mut() = Some(Box::new(m));
                McStatus::Success as i32
            }
            Err(e) => e.status() as i32,
        }
    })
}

#[no_mangle]
pub extern "C" fn bf_mc_shutdown() -> i32 {
    MC_MGR.with(|mgr| match mgr.borrow_mut().take() {
        Some(_) => McStatus::Success as i32,
        None => McStatus::NotReady as i32,
    })
}

#[no_mangle]
pub extern "C" fn bf_mc_device_add(dev: u8) -> i32 {
    with_mgr(|m| m.device_add_default(DevId(dev)))
}

#[no_mangle]
pub extern "C" fn bf_mc_device_remove(dev: u8) -> i32 {
    with_mgr(|m| m.device_remove(DevId(dev)))
}

#[no_mangle]
pub extern "C" fn bf_mc_create_session(sess: *mut u32) -> i32 {
    with_mgr(|m| {
        let out = out(sess)?;
        *out = m.session_create()?.0;
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn bf_mc_destroy_session(sess: u32) -> i32 {
    with_mgr(|m| m.session_destroy(SessionHandle(sess)))
}

#[no_mangle]
pub extern "C" fn bf_mc_begin_batch(sess: u32) -> i32 {
    with_mgr(|m| m.begin_batch(SessionHandle(sess)))
}

#[no_mangle]
pub extern "C" fn bf_mc_flush_batch(sess: u32) -> i32 {
    with_mgr(|m| m.flush_batch(SessionHandle(sess)))
}

#[no_mangle]
pub extern "C" fn bf_mc_end_batch(sess: u32, hw_synchronous: bool) -> i32 {
    with_mgr(|m| m.end_batch(SessionHandle(sess), hw_synchronous))
}

#[no_mangle]
pub extern "C" fn bf_mc_begin_txn(sess: u32, atomic: bool) -> i32 {
    with_mgr(|m| m.begin_txn(SessionHandle(sess), atomic))
}

#[no_mangle]
pub extern "C" fn bf_mc_commit_txn(sess: u32, hw_synchronous: bool) -> i32 {
    with_mgr(|m| m.commit_txn(SessionHandle(sess), hw_synchronous))
}

#[no_mangle]
pub extern "C" fn bf_mc_abort_txn(sess: u32) -> i32 {
    with_mgr(|m| m.abort_txn(SessionHandle(sess)))
}

#[no_mangle]
pub extern "C" fn bf_mc_complete_operations(sess: u32) -> i32 {
    with_mgr(|m| m.complete_operations(SessionHandle(sess)))
}

#[no_mangle]
pub extern "C" fn bf_mc_mgrp_create(sess: u32, dev: u8, grp: u16, hdl: *mut u32) -> i32 {
    with_mgr(|m| {
        let out = out(hdl)?;
        *out = m.mgrp_create(SessionHandle(sess), DevId(dev), grp)?.as_raw();
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn bf_mc_mgrp_destroy(sess: u32, dev: u8, hdl: u32) -> i32 {
    with_mgr(|m| m.mgrp_destroy(SessionHandle(sess), DevId(dev), handle(hdl)?))
}

#[no_mangle]
pub extern "C" fn bf_mc_mgrp_get_first(sess: u32, dev: u8, hdl: *mut u32) -> i32 {
    with_mgr(|m| {
        let out = out(hdl)?;
        let first = m
            .mgrp_get_first(SessionHandle(sess), DevId(dev))?
            .ok_or_else(|| McError::not_found("no multicast groups"))?;
        *out = first.as_raw();
        Ok(())
    })
}

/// Writes up to `size` handles following `hdl` into `next`, padding unused
/// slots with `0xFFFF_FFFF`.
#[no_mangle]
pub extern "C" fn bf_mc_mgrp_get_next_i(sess: u32, dev: u8, hdl: u32, size: u32, next: *mut u32) -> i32 {
    with_mgr(|m| {
        let handles = m.mgrp_get_next_i(SessionHandle(sess), DevId(dev), handle(hdl)?, size as usize)?;
        fill_handles(next, size, &handles)
    })
}

#[no_mangle]
pub extern "C" fn bf_mc_mgrp_associate_node(
    sess: u32,
    dev: u8,
    mgrp: u32,
    node: u32,
    xid_valid: bool,
    xid: u16,
) -> i32 {
    with_mgr(|m| {
        m.mgrp_associate_node(SessionHandle(sess), DevId(dev), handle(mgrp)?, handle(node)?, xid, xid_valid)
    })
}

#[no_mangle]
pub extern "C" fn bf_mc_mgrp_dissociate_node(sess: u32, dev: u8, mgrp: u32, node: u32) -> i32 {
    with_mgr(|m| m.mgrp_dissociate_node(SessionHandle(sess), DevId(dev), handle(mgrp)?, handle(node)?))
}

#[no_mangle]
pub extern "C" fn bf_mc_mgrp_associate_ecmp(
    sess: u32,
    dev: u8,
    mgrp: u32,
    ecmp: u32,
    xid_valid: bool,
    xid: u16,
) -> i32 {
    with_mgr(|m| {
        m.mgrp_associate_ecmp(SessionHandle(sess), DevId(dev), handle(mgrp)?, handle(ecmp)?, xid, xid_valid)
    })
}

#[no_mangle]
pub extern "C" fn bf_mc_mgrp_dissociate_ecmp(sess: u32, dev: u8, mgrp: u32, ecmp: u32) -> i32 {
    with_mgr(|m| m.mgrp_dissociate_ecmp(SessionHandle(sess), DevId(dev), handle(mgrp)?, handle(ecmp)?))
}

#[no_mangle]
pub extern "C" fn bf_mc_node_create(
    sess: u32,
    dev: u8,
    rid: u16,
    ports: *const u8,
    lags: *const u8,
    hdl: *mut u32,
) -> i32 {
    with_mgr(|m| {
        let out = out(hdl)?;
        let node = m.node_create(SessionHandle(sess), DevId(dev), rid, port_map(ports)?, lag_map(lags)?)?;
        *out = node.as_raw();
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn bf_mc_node_update(sess: u32, dev: u8, hdl: u32, ports: *const u8, lags: *const u8) -> i32 {
    with_mgr(|m| m.node_update(SessionHandle(sess), DevId(dev), handle(hdl)?, port_map(ports)?, lag_map(lags)?))
}

#[no_mangle]
pub extern "C" fn bf_mc_node_destroy(sess: u32, dev: u8, hdl: u32) -> i32 {
    with_mgr(|m| m.node_destroy(SessionHandle(sess), DevId(dev), handle(hdl)?))
}

#[no_mangle]
pub extern "C" fn bf_mc_ecmp_create(sess: u32, dev: u8, hdl: *mut u32) -> i32 {
    with_mgr(|m| {
        let out = out(hdl)?;
        *out = m.ecmp_create(SessionHandle(sess), DevId(dev))?.as_raw();
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn bf_mc_ecmp_destroy(sess: u32, dev: u8, hdl: u32) -> i32 {
    with_mgr(|m| m.ecmp_destroy(SessionHandle(sess), DevId(dev), handle(hdl)?))
}

#[no_mangle]
pub extern "C" fn bf_mc_ecmp_mbr_add(sess: u32, dev: u8, ecmp: u32, node: u32) -> i32 {
    with_mgr(|m| m.ecmp_mbr_add(SessionHandle(sess), DevId(dev), handle(ecmp)?, handle(node)?))
}

#[no_mangle]
pub extern "C" fn bf_mc_ecmp_mbr_rem(sess: u32, dev: u8, ecmp: u32, node: u32) -> i32 {
    with_mgr(|m| m.ecmp_mbr_rem(SessionHandle(sess), DevId(dev), handle(ecmp)?, handle(node)?))
}

#[no_mangle]
pub extern "C" fn bf_mc_set_lag_membership(sess: u32, dev: u8, lag: u8, ports: *const u8) -> i32 {
    with_mgr(|m| m.set_lag_membership(SessionHandle(sess), DevId(dev), LagId(lag), port_map(ports)?))
}

#[no_mangle]
pub extern "C" fn bf_mc_set_remote_lag_member_count(
    sess: u32,
    dev: u8,
    lag: u8,
    left: u32,
    right: u32,
) -> i32 {
    with_mgr(|m| m.set_remote_lag_member_count(SessionHandle(sess), DevId(dev), LagId(lag), left, right))
}

#[no_mangle]
pub extern "C" fn bf_mc_set_port_prune_table(sess: u32, dev: u8, yid: u16, ports: *const u8) -> i32 {
    with_mgr(|m| m.set_port_prune_table(SessionHandle(sess), DevId(dev), yid, port_map(ports)?))
}

#[no_mangle]
pub extern "C" fn bf_mc_set_global_rid(sess: u32, dev: u8, rid: u16) -> i32 {
    with_mgr(|m| m.set_global_rid(SessionHandle(sess), DevId(dev), rid))
}

#[no_mangle]
pub extern "C" fn bf_mc_set_port_mc_fwd_state(sess: u32, dev: u8, port: u16, active: bool) -> i32 {
    with_mgr(|m| m.set_port_mc_fwd_state(SessionHandle(sess), DevId(dev), DevPort::from_raw(port)?, active))
}

#[no_mangle]
pub extern "C" fn bf_mc_get_pipe_vector(sess: u32, dev: u8, mgrp: u32, pipes: *mut u8) -> i32 {
    with_mgr(|m| {
        let out = out(pipes)?;
        *out = m.pipe_vector(SessionHandle(sess), DevId(dev), handle(mgrp)?)?.bits();
        Ok(())
    })
}

/// ECMP member selection. `node` receives the invalid sentinel for an
/// empty ECMP group.
#[no_mangle]
pub extern "C" fn bf_mc_ecmp_select(
    sess: u32,
    dev: u8,
    mgrp: u32,
    ecmp: u32,
    hash1: u16,
    pkt_xid: u16,
    node: *mut u32,
    is_pruned: *mut bool,
) -> i32 {
    with_mgr(|m| {
        let node = out(node)?;
        let is_pruned = out(is_pruned)?;
        let selection = m.select_ecmp(SessionHandle(sess), DevId(dev), handle(mgrp)?, handle(ecmp)?, hash1, pkt_xid)?;
        *node = selection.node.map_or(u32::MAX, |n| n.as_raw());
        *is_pruned = selection.is_pruned;
        Ok(())
    })
}

/// LAG member selection. `port` receives [`BF_MC_INVALID_PORT`] when no
/// local port replicates.
#[no_mangle]
pub extern "C" fn bf_mc_lag_select(
    sess: u32,
    dev: u8,
    lag: u8,
    hash2: u16,
    pkt_xid: u16,
    pkt_yid: u16,
    pkt_rid: u16,
    port: *mut u16,
    is_pruned: *mut bool,
) -> i32 {
    with_mgr(|m| {
        let port = out(port)?;
        let is_pruned = out(is_pruned)?;
        let tags = PacketTags {
            xid: pkt_xid,
            yid: pkt_yid,
            rid: pkt_rid,
        };
        let selection = m.select_lag(SessionHandle(sess), DevId(dev), LagId(lag), hash2, tags)?;
        *port = selection.port.map_or(BF_MC_INVALID_PORT, |p| p.as_raw());
        *is_pruned = selection.is_pruned;
        Ok(())
    })
}
