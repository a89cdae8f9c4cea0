//! Persistent scripted execution on an embedded QuickJS engine.
//!
//! The engine lives on the host thread for its whole life. All runs share
//! one global object; session isolation comes from moving a session's
//! bindings out of the globals after every run and back in before the next
//! run under the same session id. The moved values stay live inside the
//! engine, so values with no JSON form survive between runs; the
//! [`SessionManager`] only keeps their JSON record.
//!
//! User code is evaluated through an indirect `eval`, so top-level `var`
//! declarations and bare assignments become deletable global properties
//! while `let`/`const` stay local to the run.

use std::{
    cell::RefCell,
    collections::HashSet,
    rc::Rc,
    sync::Arc,
    time::{Duration, Instant},
};

use hostlink_session::{Captured, ManagerError, SessionManager};
use parking_lot::Mutex;
use rquickjs::{Context, Ctx, FromJs, Function, Runtime, function::IntoArgs, prelude::Func};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::invoke::{InvokeRequest, Invoker, report};

const PRELUDE: &str = include_str!("prelude.js");

/// Synthetic source name user code is reported under.
pub const SOURCE_NAME: &str = "<ai-code>";

/// Scripted-execution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Wall-clock limit for one run.
    pub timeout_secs: Option<u64>,
    /// Heap limit for the engine.
    pub memory_limit_bytes: Option<usize>,
    /// Session used when a request names none.
    pub default_session: String,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            memory_limit_bytes: None,
            default_session: "default".into(),
        }
    }
}

impl ScriptConfig {
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Cross-tool calls made from scripts through `mcp.call`.
///
/// Called on the host thread; implementations block until the remote tool
/// answers.
pub trait ToolBridge: Send + Sync {
    /// Call `tool` with `arguments`, returning its result or an error text.
    ///
    /// # Errors
    /// Returns the failure description if the call failed.
    fn call(&self, tool: &str, arguments: Value) -> Result<Value, String>;
}

/// An exception raised by user code.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{name}: {message}")]
pub struct ScriptError {
    pub name: String,
    pub message: String,
    /// Exception and stack, attributed to [`SOURCE_NAME`].
    pub trace: String,
}

/// Result of one run.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// Value assigned to `__return__`, if any.
    pub return_value: Option<Value>,
    /// Names saved under the session after the run; empty for
    /// non-persistent runs.
    pub session_bindings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ScriptError>,
}

/// Failure of the engine itself, as opposed to the user's code.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("QuickJS: {0}")]
    Js(#[from] rquickjs::Error),
    #[error("Engine returned malformed data: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Session(#[from] ManagerError),
}

#[derive(Default)]
struct Output {
    stdout: RefCell<String>,
    stderr: RefCell<String>,
}

impl Output {
    fn write(&self, stream: &str, text: &str) {
        let buffer = if stream == "stderr" { &self.stderr } else { &self.stdout };
        buffer.borrow_mut().push_str(text);
    }

    fn take(&self) -> (String, String) {
        (self.stdout.take(), self.stderr.take())
    }
}

type BridgeSlot = Rc<RefCell<Option<Arc<dyn ToolBridge>>>>;

#[derive(Deserialize)]
struct ExecStatus {
    ok: bool,
    #[serde(default)]
    name: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    stack: String,
}

#[derive(Deserialize)]
struct Returned {
    present: bool,
    #[serde(default)]
    value: Value,
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Observed {
    Data { value: Value },
    Callable,
    Opaque {
        #[serde(rename = "type")]
        type_name: String,
    },
}

impl From<Observed> for Captured {
    fn from(observed: Observed) -> Self {
        match observed {
            Observed::Data { value } => Self::Data(value),
            Observed::Callable => Self::Callable,
            Observed::Opaque { type_name } => Self::Opaque(type_name),
        }
    }
}

/// The scripted-execution environment. Not `Send`: build it on the host
/// thread.
pub struct ScriptEngine {
    config: ScriptConfig,
    sessions: Arc<SessionManager>,
    context: Context,
    output: Rc<Output>,
    bridge: BridgeSlot,
    deadline: Arc<Mutex<Option<Instant>>>,
}

impl ScriptEngine {
    /// Create the engine and install the prelude.
    ///
    /// # Errors
    /// Returns error if QuickJS cannot be initialised.
    pub fn new(config: ScriptConfig, invoker: Invoker, sessions: Arc<SessionManager>) -> Result<Self, EngineError> {
        let runtime = Runtime::new()?;
        if let Some(limit) = config.memory_limit_bytes {
            runtime.set_memory_limit(limit);
        }
        let deadline: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
        let watched = Arc::clone(&deadline);
        runtime.set_interrupt_handler(Some(Box::new(move || {
            watched.lock().is_some_and(|at| Instant::now() >= at)
        })));

        let context = Context::full(&runtime)?;
        let output = Rc::new(Output::default());
        let bridge: BridgeSlot = Rc::new(RefCell::new(None));

        context.with(|ctx| -> Result<(), EngineError> {
            install_natives(&ctx, &output, &bridge, invoker)?;
            ctx.eval::<(), _>(PRELUDE)?;
            Ok(())
        })?;
        tracing::debug!(?config, "Script engine ready");

        Ok(Self {
            config,
            sessions,
            context,
            output,
            bridge,
            deadline,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &ScriptConfig {
        &self.config
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Run `code`. A persistent run re-installs the session's bindings first
    /// and keeps the ones it owns afterwards; a failed run rebinds the
    /// session to the values it had before.
    ///
    /// # Errors
    /// Returns error only if the engine or session storage fails; exceptions
    /// from user code are reported in the outcome.
    pub fn run(
        &self,
        code: &str,
        session_id: &str,
        persistent: bool,
        bridge: Option<Arc<dyn ToolBridge>>,
    ) -> Result<ScriptOutcome, EngineError> {
        *self.bridge.borrow_mut() = bridge;
        let result = self
            .context
            .with(|ctx| self.run_in(&ctx, code, session_id, persistent));
        self.bridge.borrow_mut().take();
        *self.deadline.lock() = None;
        let (stdout, stderr) = self.output.take();

        let (error, return_value, session_bindings) = result?;
        let success = error.is_none();
        match &error {
            None => tracing::info!(session_id, persistent, bindings = session_bindings.len(), "Script finished"),
            Some(e) => tracing::info!(session_id, persistent, error = %e, "Script failed"),
        }

        Ok(ScriptOutcome {
            success,
            stdout,
            stderr,
            return_value,
            session_bindings,
            error,
        })
    }

    fn run_in(
        &self,
        ctx: &Ctx<'_>,
        code: &str,
        session_id: &str,
        persistent: bool,
    ) -> Result<(Option<ScriptError>, Option<Value>, Vec<String>), EngineError> {
        let baseline: HashSet<String> = serde_json::from_str(&call::<_, String>(ctx, "__hostlink_names", ())?)?;
        let previous: Vec<String> = if persistent {
            serde_json::from_str(&call::<_, String>(ctx, "__hostlink_enter", (session_id,))?)?
        } else {
            Vec::new()
        };

        *self.deadline.lock() = self.config.timeout().map(|limit| Instant::now() + limit);
        let status = match call::<_, String>(ctx, "__hostlink_exec", (code,)) {
            Ok(json) => serde_json::from_str::<ExecStatus>(&json)?,
            Err(rquickjs::Error::Exception) => self.uncaught(ctx),
            Err(e) => return Err(e.into()),
        };
        *self.deadline.lock() = None;

        let returned: Returned = serde_json::from_str(&call::<_, String>(ctx, "__hostlink_take_return", ())?)?;
        let return_value = returned.present.then_some(returned.value);
        let error = (!status.ok).then(|| script_error(status));

        if !persistent {
            return Ok((error, return_value, Vec::new()));
        }

        let owned_before: HashSet<String> = previous.iter().cloned().collect();
        let observed: Vec<(String, Observed)> =
            serde_json::from_str(&call::<_, String>(ctx, "__hostlink_snapshot", ())?)?;
        let owned: Vec<(String, Observed)> = observed
            .into_iter()
            .filter(|(name, value)| {
                !matches!(value, Observed::Callable) && self.sessions.owns(name, &baseline, &owned_before)
            })
            .collect();
        let names: Vec<String> = owned.iter().map(|(name, _)| name.clone()).collect();

        let session_bindings = if error.is_none() {
            let globals = owned.into_iter().map(|(name, value)| (name, value.into()));
            let saved = self.sessions.capture(session_id, &baseline, &owned_before, globals)?;
            saved.keys().cloned().collect()
        } else {
            previous
        };

        call::<_, ()>(
            ctx,
            "__hostlink_leave",
            (session_id, json!(names).to_string(), error.is_none()),
        )?;
        Ok((error, return_value, session_bindings))
    }

    /// Status for an exception `try`/`catch` could not see (interrupts,
    /// out-of-memory).
    fn uncaught(&self, ctx: &Ctx<'_>) -> ExecStatus {
        let timed_out = self.deadline.lock().is_some_and(|at| Instant::now() >= at);
        let caught = ctx.catch();
        let (message, stack) = caught.as_exception().map_or_else(
            || (format!("{caught:?}"), String::new()),
            |e| (e.message().unwrap_or_default(), e.stack().unwrap_or_default()),
        );

        if timed_out {
            ExecStatus {
                ok: false,
                name: "TimeoutError".into(),
                message: format!(
                    "execution exceeded {}s",
                    self.config.timeout_secs.unwrap_or_default()
                ),
                stack,
            }
        } else {
            ExecStatus {
                ok: false,
                name: "InternalError".into(),
                message,
                stack,
            }
        }
    }

    /// Drop the bindings of one session, or of every session.
    ///
    /// # Errors
    /// Returns error if session storage fails.
    pub fn reset(&self, session_id: Option<&str>) -> Result<usize, EngineError> {
        let dropped = self.sessions.reset(session_id)?;
        self.context
            .with(|ctx| call::<_, ()>(&ctx, "__hostlink_forget", (session_id,)))?;
        Ok(dropped)
    }
}

fn call<'js, A, R>(ctx: &Ctx<'js>, name: &str, args: A) -> rquickjs::Result<R>
where
    A: IntoArgs<'js>,
    R: FromJs<'js>,
{
    let function: Function<'js> = ctx.globals().get(name)?;
    function.call(args)
}

fn script_error(status: ExecStatus) -> ScriptError {
    let stack = status.stack.replace("<input>", SOURCE_NAME).replace("<eval>", SOURCE_NAME);
    let mut trace = format!("{}: {}\n", status.name, status.message);
    if stack.trim().is_empty() {
        trace.push_str("    at ");
        trace.push_str(SOURCE_NAME);
        trace.push('\n');
    } else {
        trace.push_str(&stack);
    }
    ScriptError {
        name: status.name,
        message: status.message,
        trace,
    }
}

fn install_natives(
    ctx: &Ctx<'_>,
    output: &Rc<Output>,
    bridge: &BridgeSlot,
    invoker: Invoker,
) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    globals.set(
        "__hostlink_write",
        Func::from({
            let output = Rc::clone(output);
            move |stream: String, text: String| output.write(&stream, &text)
        }),
    )?;

    let context = Arc::clone(invoker.context());
    globals.set(
        "__hostlink_context",
        Func::from(move || -> String { Value::from(context.labels()).to_string() }),
    )?;

    globals.set(
        "__hostlink_invoke",
        Func::from(move |request: String| -> String { invoke_json(&invoker, &request).to_string() }),
    )?;

    globals.set(
        "__hostlink_mcp_call",
        Func::from({
            let bridge = Rc::clone(bridge);
            move |tool: String, arguments: String| -> String {
                let current = bridge.borrow().clone();
                let reply = match (current, serde_json::from_str::<Value>(&arguments)) {
                    (None, _) => Err("cross-tool calls are not available in this run".to_string()),
                    (_, Err(e)) => Err(format!("arguments are not JSON: {e}")),
                    (Some(bridge), Ok(arguments)) => bridge.call(&tool, arguments),
                };
                match reply {
                    Ok(value) => json!({"ok": true, "value": value}),
                    Err(error) => json!({"ok": false, "error": error}),
                }
                .to_string()
            }
        }),
    )?;

    Ok(())
}

/// `host.invoke` from a script: the same report a remote caller gets.
fn invoke_json(invoker: &Invoker, request: &str) -> Value {
    let request: InvokeRequest = match serde_json::from_str(request) {
        Ok(request) => request,
        Err(e) => {
            return json!({
                "success": false,
                "error": {"kind": "InvalidRequest", "message": e.to_string(), "causes": []},
            });
        }
    };
    match invoker.invoke(&request) {
        Ok(outcome) => report::success(&request, &outcome, invoker.context().labels()),
        Err(failure) => report::failure(&request, &failure, invoker.context().labels()),
    }
}

#[cfg(test)]
mod tests {
    use hostlink_core::{ContextStore, demo::DemoHost};

    use super::*;

    fn engine_with(config: ScriptConfig) -> ScriptEngine {
        let invoker = Invoker::new(Arc::new(DemoHost::new()), Arc::new(ContextStore::new()));
        ScriptEngine::new(config, invoker, Arc::new(SessionManager::default())).unwrap()
    }

    fn engine() -> ScriptEngine {
        engine_with(ScriptConfig::default())
    }

    fn run(engine: &ScriptEngine, code: &str, session: &str) -> ScriptOutcome {
        engine.run(code, session, true, None).unwrap()
    }

    struct Echo;

    impl ToolBridge for Echo {
        fn call(&self, tool: &str, arguments: Value) -> Result<Value, String> {
            if tool == "broken" {
                return Err("tool failed".into());
            }
            Ok(json!({"tool": tool, "arguments": arguments}))
        }
    }

    #[test]
    fn test_stdout_stderr_and_return_value() {
        let engine = engine();
        let outcome = run(
            &engine,
            r#"print("hi", 1, {a: 2}); console.error("oops"); __return__ = {n: 3};"#,
            "s1",
        );
        assert!(outcome.success);
        assert_eq!(outcome.stdout, "hi 1 {\"a\":2}\n");
        assert_eq!(outcome.stderr, "oops\n");
        assert_eq!(outcome.return_value, Some(json!({"n": 3})));
        assert!(outcome.session_bindings.is_empty());

        let next = run(&engine, "print(typeof __return__)", "s1");
        assert_eq!(next.stdout, "undefined\n");
        assert_eq!(next.return_value, None);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let engine = engine();
        let first = run(&engine, "var x = 1; y = 'a';", "s1");
        assert_eq!(first.session_bindings, vec!["x".to_string(), "y".to_string()]);

        let other = run(&engine, "print(typeof x, typeof y)", "s2");
        assert_eq!(other.stdout, "undefined undefined\n");
        assert!(other.session_bindings.is_empty());

        let again = run(&engine, "x += 1; print(x, y)", "s1");
        assert_eq!(again.stdout, "2 a\n");
        assert_eq!(engine.sessions().snapshot("s1").unwrap()["x"], json!(2));
    }

    #[test]
    fn test_failed_run_leaves_session_unchanged() {
        let engine = engine();
        run(&engine, "var count = 1", "s1");

        let failed = run(&engine, "count = 5; var extra = 2; missing();", "s1");
        assert!(!failed.success);
        let error = failed.error.unwrap();
        assert_eq!(error.name, "ReferenceError");
        assert!(error.trace.contains(SOURCE_NAME));
        assert_eq!(failed.session_bindings, vec!["count".to_string()]);

        let after = run(&engine, "print(count, typeof extra)", "s1");
        assert_eq!(after.stdout, "1 undefined\n");
    }

    #[test]
    fn test_bindings_accumulate_across_runs() {
        let engine = engine();
        run(&engine, "var total = 1; var items = [1];", "s1");
        run(&engine, "total += 1; items.push(total);", "s1");
        run(&engine, "var total = 100", "s2");
        let third = run(&engine, "total *= 10; var label = 'x';", "s1");
        assert!(third.success, "{:?}", third.error);
        assert_eq!(third.session_bindings, vec!["total", "items", "label"]);

        let fourth = run(&engine, "print(total, items.length, label)", "s1");
        assert_eq!(fourth.stdout, "20 2 x\n");
        assert_eq!(fourth.session_bindings, vec!["total", "items", "label"]);
        assert_eq!(engine.sessions().snapshot("s1").unwrap()["items"], json!([1, 2]));
        assert_eq!(run(&engine, "print(total)", "s2").stdout, "100\n");
    }

    #[test]
    fn test_values_without_json_form_persist() {
        let engine = engine();
        let first = run(
            &engine,
            "var inf = 1/0; var big = 10n; var u; var n = 3; var cyc = {}; cyc.self = cyc;",
            "s1",
        );
        assert!(first.success, "{:?}", first.error);
        assert_eq!(first.session_bindings, vec!["inf", "big", "u", "n", "cyc"]);

        let record = engine.sessions().snapshot("s1").unwrap();
        assert_eq!(record["inf"], json!("<Infinity>"));
        assert_eq!(record["big"], json!("<bigint>"));
        assert_eq!(record["u"], json!("<undefined>"));
        assert_eq!(record["n"], json!(3));

        let second = run(
            &engine,
            r#"print(String(inf), typeof big, big + 1n === 11n, "u" in globalThis, n, cyc.self === cyc)"#,
            "s1",
        );
        assert!(second.success, "{:?}", second.error);
        assert_eq!(second.stdout, "Infinity bigint true true 3 true\n");

        assert_eq!(run(&engine, "print(typeof big)", "s2").stdout, "undefined\n");
    }

    #[test]
    fn test_thrown_values_and_syntax_errors() {
        let engine = engine();
        let thrown = run(&engine, "throw 'plain'", "s1");
        let error = thrown.error.unwrap();
        assert_eq!(error.message, "plain");
        assert!(!error.trace.is_empty());

        let syntax = run(&engine, "var = ;", "s1");
        assert_eq!(syntax.error.unwrap().name, "SyntaxError");
    }

    #[test]
    fn test_functions_persist_but_are_not_captured() {
        let engine = engine();
        let outcome = run(&engine, "function twice(v) { return v * 2 } var y = twice(2);", "s1");
        assert_eq!(outcome.session_bindings, vec!["y".to_string()]);

        let other = run(&engine, "print(twice(5))", "s2");
        assert_eq!(other.stdout, "10\n");
    }

    #[test]
    fn test_lexical_declarations_do_not_persist() {
        let engine = engine();
        let first = run(&engine, "let z = 1; const w = 2;", "s1");
        assert!(first.session_bindings.is_empty());
        assert_eq!(run(&engine, "print(typeof z, typeof w)", "s1").stdout, "undefined undefined\n");
    }

    #[test]
    fn test_non_persistent_bindings_stay_global() {
        let engine = engine();
        let outcome = engine.run("var g = 7", "s1", false, None).unwrap();
        assert!(outcome.session_bindings.is_empty());

        let later = run(&engine, "print(g)", "s2");
        assert_eq!(later.stdout, "7\n");
        // Existed before the run and was never saved: not owned by s2
        assert!(later.session_bindings.is_empty());
        assert!(engine.sessions().snapshot("s2").unwrap().is_empty());
    }

    #[test]
    fn test_host_invoke_from_script() {
        let engine = engine();
        let outcome = run(
            &engine,
            r#"
            var c = host.invoke("make.circle", [3], {}, "c");
            print(c["$type"], host.invoke("$c.radius"));
            print(host.context());
            try { host.invoke("app.nope") } catch (e) { print(e.name) }
            "#,
            "s1",
        );
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.stdout, "Circle 3\n[\"c\"]\nPathNotFound\n");
    }

    #[test]
    fn test_mcp_call_goes_through_bridge() {
        let engine = engine();
        let code = r#"
            print(mcp.call("other", {a: 1}).arguments.a);
            try { mcp.call("broken") } catch (e) { print(e.name, e.message) }
        "#;
        let outcome = engine.run(code, "s1", true, Some(Arc::new(Echo))).unwrap();
        assert_eq!(outcome.stdout, "1\nToolCallError tool failed\n");

        let without = run(&engine, "mcp.call('other', {})", "s1");
        assert_eq!(without.error.unwrap().name, "ToolCallError");
    }

    #[test]
    fn test_timeout_interrupts_and_engine_recovers() {
        let engine = engine_with(ScriptConfig {
            timeout_secs: Some(1),
            ..ScriptConfig::default()
        });
        let outcome = run(&engine, "var spin = 0; while (true) { spin++ }", "s1");
        assert!(!outcome.success);
        assert_eq!(outcome.error.unwrap().name, "TimeoutError");
        assert!(outcome.session_bindings.is_empty());

        let next = run(&engine, "print(typeof spin)", "s1");
        assert!(next.success);
        assert_eq!(next.stdout, "undefined\n");
    }

    #[test]
    fn test_reset_drops_session() {
        let engine = engine();
        run(&engine, "var a = 1", "s1");
        run(&engine, "var b = 1", "s2");
        assert_eq!(engine.reset(Some("s1")).unwrap(), 1);
        assert_eq!(run(&engine, "print(typeof a)", "s1").stdout, "undefined\n");
        assert_eq!(engine.reset(None).unwrap(), 2);
    }
}
