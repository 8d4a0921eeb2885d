// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Driver-script sandbox: trusted JS converters between JSON payloads and
//! DPA frame bytes.
//!
//! Each sandbox instance owns one dedicated worker thread holding a
//! `boa_engine` context (the context is `!Send`); callers marshal load and
//! call requests over a channel. `load` replaces the driver set only on
//! successful evaluation. Driver code gets no clock, randomness, filesystem,
//! or network: calls are pure functions of (driver set, function, params).

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::ThreadId;

use boa_engine::{js_string, Context, JsObject, JsString, JsValue, Source};
use tokio::sync::{mpsc, oneshot, RwLock};

use crate::error::{DriverFault, GwError};

/// Prelude evaluated into every fresh context before driver code. Drivers
/// are pure converters; the ambient clock and randomness are removed.
const DETERMINISM_PRELUDE: &str = "Date = undefined; Math.random = undefined;";

enum SandboxCmd {
    Load { code: String, reply: oneshot::Sender<Result<(), GwError>> },
    Call { function: String, params: String, reply: oneshot::Sender<Result<String, GwError>> },
}

/// Handle to one sandbox instance.
pub struct DriverSandbox {
    tx: mpsc::UnboundedSender<SandboxCmd>,
    worker_thread: ThreadId,
}

impl DriverSandbox {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (id_tx, id_rx) = std::sync::mpsc::channel();
        std::thread::Builder::new()
            .name("driver-sandbox".to_owned())
            .spawn(move || {
                let _ = id_tx.send(std::thread::current().id());
                worker(rx);
            })
            .map(|_| ())
            .unwrap_or_else(|e| tracing::error!(err = %e, "sandbox worker spawn failed"));
        let worker_thread =
            id_rx.recv().unwrap_or_else(|_| std::thread::current().id());
        Self { tx, worker_thread }
    }

    /// Replace the driver set. Evaluation failure leaves the previous set
    /// intact.
    pub async fn load(&self, code: String) -> Result<(), GwError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SandboxCmd::Load { code, reply })
            .map_err(|_| worker_gone())?;
        rx.await.map_err(|_| worker_gone())?
    }

    /// Look up a dot-separated function path and invoke it with the parsed
    /// JSON argument; the returned value comes back JSON-serialized.
    pub async fn call(&self, function: &str, params: &str) -> Result<String, GwError> {
        if std::thread::current().id() == self.worker_thread {
            // A driver calling back into its own sandbox would deadlock the
            // worker; the contract rejects it instead.
            return Err(GwError::Driver(DriverFault::Reentrant));
        }
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SandboxCmd::Call {
                function: function.to_owned(),
                params: params.to_owned(),
                reply,
            })
            .map_err(|_| worker_gone())?;
        rx.await.map_err(|_| worker_gone())?
    }
}

impl Default for DriverSandbox {
    fn default() -> Self {
        Self::new()
    }
}

fn worker_gone() -> GwError {
    GwError::Driver(DriverFault::Runtime("sandbox worker is gone".to_owned()))
}

fn worker(mut rx: mpsc::UnboundedReceiver<SandboxCmd>) {
    let mut context: Option<Context> = None;
    while let Some(cmd) = rx.blocking_recv() {
        match cmd {
            SandboxCmd::Load { code, reply } => {
                let _ = reply.send(load_drivers(&mut context, &code));
            }
            SandboxCmd::Call { function, params, reply } => {
                let result = match context.as_mut() {
                    Some(ctx) => invoke(ctx, &function, &params),
                    None => Err(GwError::Driver(DriverFault::NotFound)),
                };
                let _ = reply.send(result);
            }
        }
    }
}

fn load_drivers(current: &mut Option<Context>, code: &str) -> Result<(), GwError> {
    let mut fresh = Context::default();
    fresh
        .eval(Source::from_bytes(DETERMINISM_PRELUDE.as_bytes()))
        .map_err(|e| GwError::Driver(DriverFault::LoadError(e.to_string())))?;
    if let Err(e) = fresh.eval(Source::from_bytes(code.as_bytes())) {
        // The previous driver set stays active.
        return Err(GwError::Driver(DriverFault::LoadError(e.to_string())));
    }
    *current = Some(fresh);
    Ok(())
}

/// Walk the dot-separated path in the global object down to a callable.
fn resolve(ctx: &mut Context, function: &str) -> Result<(JsObject, JsObject), GwError> {
    let mut holder = ctx.global_object();
    let mut segments = function.split('.').peekable();
    loop {
        let Some(segment) = segments.next() else {
            return Err(GwError::Driver(DriverFault::NotFound));
        };
        let value = holder
            .get(JsString::from(segment), ctx)
            .map_err(|_| GwError::Driver(DriverFault::NotFound))?;
        let object = match value.as_object() {
            Some(o) => o.clone(),
            None => return Err(GwError::Driver(DriverFault::NotFound)),
        };
        if segments.peek().is_none() {
            if !object.is_callable() {
                return Err(GwError::Driver(DriverFault::NotFound));
            }
            return Ok((holder, object));
        }
        holder = object;
    }
}

fn invoke(ctx: &mut Context, function: &str, params: &str) -> Result<String, GwError> {
    let (holder, callable) = resolve(ctx, function)?;
    let argument = json_parse(ctx, params)?;
    let returned = callable
        .call(&JsValue::from(holder), &[argument], ctx)
        .map_err(|e| GwError::Driver(DriverFault::Runtime(e.to_string())))?;
    json_stringify(ctx, &returned)
}

/// Decode a JSON string through the engine's own `JSON.parse`.
fn json_parse(ctx: &mut Context, text: &str) -> Result<JsValue, GwError> {
    let (json, parse) = json_member(ctx, "parse")?;
    parse
        .call(&JsValue::from(json), &[JsValue::from(JsString::from(text))], ctx)
        .map_err(|e| GwError::Driver(DriverFault::Runtime(format!("invalid params: {e}"))))
}

/// Encode a value through the engine's own `JSON.stringify`; `undefined`
/// serializes as `null`.
fn json_stringify(ctx: &mut Context, value: &JsValue) -> Result<String, GwError> {
    if value.is_undefined() {
        return Ok("null".to_owned());
    }
    let (json, stringify) = json_member(ctx, "stringify")?;
    let encoded = stringify
        .call(&JsValue::from(json), &[value.clone()], ctx)
        .map_err(|e| GwError::Driver(DriverFault::Runtime(e.to_string())))?;
    match encoded.as_string() {
        Some(s) => Ok(s.to_std_string_escaped()),
        None => Ok("null".to_owned()),
    }
}

fn json_member(ctx: &mut Context, name: &str) -> Result<(JsObject, JsObject), GwError> {
    let runtime_err =
        |msg: &str| GwError::Driver(DriverFault::Runtime(msg.to_owned()));
    let json = ctx
        .global_object()
        .get(js_string!("JSON"), ctx)
        .map_err(|_| runtime_err("JSON global missing"))?;
    let json = json.as_object().cloned().ok_or_else(|| runtime_err("JSON global missing"))?;
    let member = json
        .get(JsString::from(name), ctx)
        .map_err(|_| runtime_err("JSON member missing"))?;
    let member =
        member.as_object().cloned().ok_or_else(|| runtime_err("JSON member missing"))?;
    Ok((json, member))
}

/// Fenced sandboxes keyed by driver id: independent instances for
/// multi-tenant isolation.
#[derive(Default)]
pub struct SandboxPool {
    instances: RwLock<HashMap<u32, Arc<DriverSandbox>>>,
}

impl SandboxPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a driver set into the sandbox fenced by `driver_id`, creating
    /// the instance on first use.
    pub async fn load_fenced(&self, driver_id: u32, code: String) -> Result<(), GwError> {
        let sandbox = {
            let mut instances = self.instances.write().await;
            Arc::clone(instances.entry(driver_id).or_insert_with(|| Arc::new(DriverSandbox::new())))
        };
        sandbox.load(code).await
    }

    /// Call into the sandbox fenced by `driver_id`.
    pub async fn call_fenced(
        &self,
        driver_id: u32,
        function: &str,
        params: &str,
    ) -> Result<String, GwError> {
        let sandbox = {
            let instances = self.instances.read().await;
            instances.get(&driver_id).cloned()
        };
        match sandbox {
            Some(s) => s.call(function, params).await,
            None => Err(GwError::Driver(DriverFault::NotFound)),
        }
    }
}

#[cfg(test)]
#[path = "sandbox_tests.rs"]
mod tests;
