//! Lua scripted extensions.
//!
//! A script declares its package and entry points as globals:
//!
//! ```lua
//! PACKAGE = "echo"
//!
//! function info() return "复读", "repeats the arguments" end
//!
//! function init(store)
//!   store:exec("CREATE TABLE IF NOT EXISTS echo_log (text TEXT)")
//! end
//!
//! function handle(ctx)
//!   ctx:store():exec("INSERT INTO echo_log (text) VALUES (?)", ctx:text())
//!   ctx:reply(ctx:text())
//!   return true
//! end
//! ```
//!
//! `handle` is mandatory; `info`, `init` and `destroy` are optional. A global
//! of the wrong type is rejected at load time. `handle` returning `nil` counts
//! as handled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mlua::{Function, Lua, Table, UserData, UserDataMethods, Value, Variadic};
use parking_lot::Mutex;
use steward_core::Reply;
use steward_store::{SqlValue, Store};
use tracing::debug;

use super::instance::panic_message;
use super::remote::{MediaKind, media_reply};
use super::{BoxedExtension, CodeLoader, Extension, ExtensionInfo, Invocation, source_hash};
use crate::error::{ExtensionError, ExtensionResult};

/// Loads Lua 5.4 scripts.
#[derive(Debug, Clone, Copy, Default)]
pub struct LuaLoader;

#[async_trait]
impl CodeLoader for LuaLoader {
    async fn load(&self, package_hint: &str, source: &str) -> ExtensionResult<BoxedExtension> {
        Ok(Arc::new(LuaExtension::compile(package_hint, source)?))
    }
}

struct Entries {
    // Keeps the state alive for the functions below.
    _lua: Lua,
    handle: Function,
    init: Option<Function>,
    destroy: Option<Function>,
}

/// An extension backed by its own Lua state.
pub struct LuaExtension {
    id: String,
    hash: String,
    info: ExtensionInfo,
    entries: Arc<Mutex<Entries>>,
}

impl LuaExtension {
    /// Evaluates `source` in a fresh state and resolves its entry points.
    pub fn compile(package_hint: &str, source: &str) -> ExtensionResult<Self> {
        let lua = Lua::new();
        lua.load(source)
            .set_name(format!("={package_hint}"))
            .exec()
            .map_err(|e| ExtensionError::source_error(e.to_string()))?;

        let globals = lua.globals();
        let declared = match get_global(&globals, "PACKAGE")? {
            Value::Nil => None,
            Value::String(s) => Some(s.to_string_lossy()),
            other => {
                return Err(ExtensionError::validation(format!(
                    "PACKAGE必须是字符串, 实际为{}",
                    other.type_name()
                )));
            }
        };
        let id = declared
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| package_hint.to_string());
        if id.is_empty() {
            return Err(ExtensionError::validation("插件未声明包名"));
        }

        let handle = entry(&globals, "handle")?
            .ok_or_else(|| ExtensionError::validation(format!("插件{id}缺少handle函数")))?;
        let info = match entry(&globals, "info")? {
            Some(f) => {
                let (trigger_hint, description) = f
                    .call::<(Option<String>, Option<String>)>(())
                    .map_err(|e| ExtensionError::fault(&id, e.to_string()))?;
                ExtensionInfo {
                    trigger_hint: trigger_hint.unwrap_or_default(),
                    description: description.unwrap_or_default(),
                }
            }
            None => ExtensionInfo::default(),
        };
        let init = entry(&globals, "init")?;
        let destroy = entry(&globals, "destroy")?;
        drop(globals);

        debug!(extension = %id, "Lua extension compiled");
        Ok(Self {
            hash: source_hash(source),
            id,
            info,
            entries: Arc::new(Mutex::new(Entries {
                _lua: lua,
                handle,
                init,
                destroy,
            })),
        })
    }

    fn call_lifecycle(
        &self,
        pick: fn(&Entries) -> Option<&Function>,
        store: &Store,
    ) -> ExtensionResult<()> {
        let entries = self.entries.lock();
        if let Some(f) = pick(&entries) {
            f.call::<()>(LuaStore(store.clone()))
                .map_err(|e| ExtensionError::fault(&self.id, e.to_string()))?;
        }
        Ok(())
    }
}

fn get_global(globals: &Table, name: &str) -> ExtensionResult<Value> {
    globals
        .get::<Value>(name)
        .map_err(|e| ExtensionError::source_error(e.to_string()))
}

/// Resolves an entry point. `nil` means "not declared".
fn entry(globals: &Table, name: &str) -> ExtensionResult<Option<Function>> {
    match get_global(globals, name)? {
        Value::Nil => Ok(None),
        Value::Function(f) => Ok(Some(f)),
        other => Err(ExtensionError::validation(format!(
            "{name}必须是函数, 实际为{}",
            other.type_name()
        ))),
    }
}

#[async_trait]
impl Extension for LuaExtension {
    fn id(&self) -> &str {
        &self.id
    }

    fn source_hash(&self) -> &str {
        &self.hash
    }

    fn info(&self) -> ExtensionInfo {
        self.info.clone()
    }

    fn init(&self, store: &Store) -> ExtensionResult<()> {
        self.call_lifecycle(|e| e.init.as_ref(), store)
    }

    fn destroy(&self, store: &Store) -> ExtensionResult<()> {
        self.call_lifecycle(|e| e.destroy.as_ref(), store)
    }

    async fn handle(&self, invocation: Arc<Invocation>) -> ExtensionResult<bool> {
        let entries = Arc::clone(&self.entries);
        let outcome = tokio::task::spawn_blocking(move || {
            let entries = entries.lock();
            entries.handle.call::<Option<bool>>(LuaContext(invocation))
        })
        .await;

        match outcome {
            Ok(Ok(handled)) => Ok(handled.unwrap_or(true)),
            Ok(Err(e)) => Err(ExtensionError::fault(&self.id, e.to_string())),
            Err(join) if join.is_panic() => Err(ExtensionError::fault(
                &self.id,
                panic_message(join.into_panic().as_ref()),
            )),
            Err(join) => Err(ExtensionError::fault(&self.id, join.to_string())),
        }
    }
}

// =============================================================================
// Script facing userdata
// =============================================================================

/// `ctx` argument of `handle`.
struct LuaContext(Arc<Invocation>);

impl UserData for LuaContext {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("params", |_, this, ()| Ok(this.0.params().to_vec()));
        methods.add_method("text", |_, this, ()| Ok(this.0.text()));
        methods.add_method("keyword", |_, this, ()| Ok(this.0.keyword().to_string()));
        methods.add_method("target", |_, this, ()| Ok(this.0.target().to_string()));

        methods.add_method("sender", |lua, this, ()| {
            let Some(msg) = this.0.message_ref() else {
                return Ok(Value::Nil);
            };
            let t = lua.create_table()?;
            t.set("uid", msg.sender.uid.as_str())?;
            t.set("nickname", msg.sender.nickname.as_str())?;
            t.set("name", msg.sender.group_name())?;
            Ok(Value::Table(t))
        });

        methods.add_method("group", |lua, this, ()| {
            let Some(group) = this.0.message_ref().and_then(|m| m.group.as_ref()) else {
                return Ok(Value::Nil);
            };
            let t = lua.create_table()?;
            t.set("gid", group.gid.as_str())?;
            t.set("name", group.name.as_str())?;
            Ok(Value::Table(t))
        });

        methods.add_method("reply", |_, this, text: String| {
            this.0.reply(Reply::text(text));
            Ok(())
        });

        methods.add_method(
            "reply_image",
            |_, this, (body, filename): (String, Option<String>)| {
                let reply = media_reply(MediaKind::Image, &body, filename.as_deref().unwrap_or(""))
                    .map_err(mlua::Error::external)?;
                this.0.reply(reply);
                Ok(())
            },
        );

        methods.add_method("lock", |_, this, (key, ttl): (String, u64)| {
            this.0
                .lock()
                .acquire(&key, Duration::from_secs(ttl))
                .map_err(mlua::Error::external)
        });

        methods.add_method("renew", |_, this, (key, ttl): (String, u64)| {
            this.0
                .lock()
                .update(&key, Duration::from_secs(ttl))
                .map_err(mlua::Error::external)
        });

        methods.add_method("store", |_, this, ()| Ok(LuaStore(this.0.store().clone())));
    }
}

/// Database handle exposed to scripts.
struct LuaStore(Store);

impl UserData for LuaStore {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("exec", |_, this, (sql, args): (String, Variadic<Value>)| {
            let params = sql_params(&args)?;
            this.0.exec(&sql, &params).map_err(mlua::Error::external)
        });

        methods.add_method("query", |lua, this, (sql, args): (String, Variadic<Value>)| {
            let params = sql_params(&args)?;
            let rows = this.0.query(&sql, &params).map_err(mlua::Error::external)?;
            let out = lua.create_table()?;
            for (i, row) in rows.into_iter().enumerate() {
                let t = lua.create_table()?;
                for (name, value) in row {
                    t.set(name, sql_to_lua(lua, value)?)?;
                }
                out.set(i + 1, t)?;
            }
            Ok(out)
        });
    }
}

fn sql_params(args: &[Value]) -> mlua::Result<Vec<SqlValue>> {
    args.iter().map(lua_to_sql).collect()
}

fn lua_to_sql(value: &Value) -> mlua::Result<SqlValue> {
    Ok(match value {
        Value::Nil => SqlValue::Null,
        Value::Boolean(b) => SqlValue::Integer(i64::from(*b)),
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Number(n) => SqlValue::Real(*n),
        Value::String(s) => SqlValue::Text(s.to_string_lossy()),
        other => {
            return Err(mlua::Error::RuntimeError(format!(
                "cannot bind {} as SQL parameter",
                other.type_name()
            )));
        }
    })
}

fn sql_to_lua(lua: &Lua, value: SqlValue) -> mlua::Result<Value> {
    Ok(match value {
        SqlValue::Null => Value::Nil,
        SqlValue::Integer(i) => Value::Integer(i),
        SqlValue::Real(f) => Value::Number(f),
        SqlValue::Text(s) => Value::String(lua.create_string(&s)?),
        SqlValue::Blob(b) => Value::String(lua.create_string(&b)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::HostServices;
    use steward_core::{Group, InboundMessage, Media, User};

    const ECHO: &str = r#"
PACKAGE = "echo"

function info() return "复读", "repeats the arguments" end

function init(store)
  store:exec("CREATE TABLE IF NOT EXISTS echo_log (text TEXT)")
end

function handle(ctx)
  ctx:store():exec("INSERT INTO echo_log (text) VALUES (?)", ctx:text())
  ctx:reply(ctx:sender().name .. ": " .. ctx:text())
  return true
end

function destroy(store)
  store:exec("DROP TABLE echo_log")
end
"#;

    fn invocation(services: &HostServices, params: &[&str]) -> Arc<Invocation> {
        let msg = InboundMessage::text(
            "m1",
            User::new("u1", "alice"),
            Group::new("g1", "Family"),
            "",
        );
        Arc::new(Invocation::message(
            msg,
            "复读",
            params.iter().map(|s| s.to_string()).collect(),
            services,
        ))
    }

    #[test]
    fn test_compile_resolves_declarations() {
        let ext = LuaExtension::compile("ignored", ECHO).unwrap();
        assert_eq!(ext.id(), "echo");
        assert_eq!(ext.source_hash(), source_hash(ECHO));
        assert_eq!(ext.info().trigger_hint, "复读");
        assert_eq!(ext.info().description, "repeats the arguments");
    }

    #[test]
    fn test_package_falls_back_to_hint() {
        let ext = LuaExtension::compile("hinted", "function handle(ctx) end").unwrap();
        assert_eq!(ext.id(), "hinted");
        assert_eq!(ext.info(), ExtensionInfo::default());

        let err = LuaExtension::compile("", "function handle(ctx) end").err().unwrap();
        assert!(matches!(err, ExtensionError::Validation(_)));
    }

    #[test]
    fn test_entry_point_shapes() {
        let missing = LuaExtension::compile("x", "function info() end").err().unwrap();
        assert!(matches!(missing, ExtensionError::Validation(_)));

        let wrong = LuaExtension::compile("x", "function handle() end\ninit = 5")
            .err()
            .unwrap();
        assert!(wrong.to_string().contains("init"));

        let syntax = LuaExtension::compile("x", "function handle(").err().unwrap();
        assert!(matches!(syntax, ExtensionError::Source(_)));
    }

    #[tokio::test]
    async fn test_lifecycle_and_handle() {
        let services = HostServices::new(Store::open_in_memory().unwrap());
        let ext = LuaExtension::compile("echo", ECHO).unwrap();
        ext.init(&services.store).unwrap();

        let inv = invocation(&services, &["hello", "world"]);
        assert!(ext.handle(inv.clone()).await.unwrap());
        assert_eq!(inv.take_replies(), vec![Reply::text("alice: hello world")]);

        let rows = services.store.query("SELECT text FROM echo_log", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0].1, SqlValue::Text("hello world".into()));

        ext.destroy(&services.store).unwrap();
        assert!(services.store.query("SELECT text FROM echo_log", &[]).is_err());
    }

    #[tokio::test]
    async fn test_script_error_is_runtime_fault() {
        let services = HostServices::new(Store::open_in_memory().unwrap());
        let ext = LuaExtension::compile("bad", "function handle(ctx) error('nope') end").unwrap();
        let err = ext.handle(invocation(&services, &[])).await.unwrap_err();
        match err {
            ExtensionError::RuntimeFault { id, message } => {
                assert_eq!(id, "bad");
                assert!(message.contains("nope"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_return_values_and_media() {
        let services = HostServices::new(Store::open_in_memory().unwrap());
        let source = r#"
function handle(ctx)
  if ctx:text() == "skip" then return false end
  ctx:reply_image("http://img/cat.png", "cat.png")
  assert(ctx:lock("k", 10) == 0)
  assert(ctx:lock("k", 10) == 10)
end
"#;
        let ext = LuaExtension::compile("media", source).unwrap();
        assert!(!ext.handle(invocation(&services, &["skip"])).await.unwrap());

        let inv = invocation(&services, &[]);
        assert!(ext.handle(inv.clone()).await.unwrap());
        assert_eq!(
            inv.take_replies(),
            vec![Reply::Image {
                media: Media::Url("http://img/cat.png".into()),
                filename: "cat.png".into(),
            }]
        );
    }
}
