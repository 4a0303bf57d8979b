use mlua::{Function, Lua, LuaSerdeExt, Value};
use tracing::info;

use super::decode::{envelope_to_table, table_to_outgoing};
use super::{Evaluation, FilterError, FilterMode, Verdict};
use crate::envelope::Envelope;

const CHUNK_NAME: &str = "=filter";

// The user script becomes the body of a function taking `msg`. The flags are
// upvalues only the three primitives can touch.
const PRELUDE: &str = "local function __process(msg)\n\
    local __pass, __stop, __commit = false, false, false\n\
    local function pass() __pass = true end\n\
    local function stop() __stop = true end\n\
    local function commit() __commit = true end\n";

const EPILOGUE: &str = "\nreturn __commit, __stop, __pass, msg\nend\nreturn __process\n";

// Installed last, so only names defined by the runtime itself are readable
// and nothing new can be assigned.
const STRICT_GLOBALS: &str = r#"
setmetatable(_G, {
  __newindex = function(_, name)
    error("assignment to undeclared global '" .. tostring(name) .. "'", 2)
  end,
  __index = function(_, name)
    error("undeclared global '" .. tostring(name) .. "'", 2)
  end,
})
"#;

/// A validated filter script, ready to be instantiated once per partition.
#[derive(Debug, Clone)]
pub struct FilterScript {
    chunk: String,
    mode: FilterMode,
}

impl FilterScript {
    pub fn compile(source: &str, mode: FilterMode) -> Result<Self, FilterError> {
        let chunk = format!("{PRELUDE}{source}{EPILOGUE}");

        Lua::new()
            .load(chunk.as_str())
            .set_name(CHUNK_NAME)
            .into_function()
            .map_err(FilterError::Compile)?;

        Ok(Self { chunk, mode })
    }

    /// A fresh interpreter with the helpers installed and the script loaded.
    pub fn instantiate(&self) -> Result<FilterContext, FilterError> {
        let lua = Lua::new();
        install_helpers(&lua).map_err(FilterError::Runtime)?;
        lua.load(STRICT_GLOBALS)
            .set_name("=strict")
            .exec()
            .map_err(FilterError::Runtime)?;

        let process = lua
            .load(self.chunk.as_str())
            .set_name(CHUNK_NAME)
            .eval::<Function>()
            .map_err(FilterError::Compile)?;

        Ok(FilterContext {
            lua,
            process,
            mode: self.mode,
        })
    }
}

/// One partition's interpreter. Never shared.
pub struct FilterContext {
    lua: Lua,
    process: Function,
    mode: FilterMode,
}

impl FilterContext {
    pub fn evaluate(&self, envelope: &Envelope) -> Result<Evaluation, FilterError> {
        let execution = |source| FilterError::Execution {
            topic: envelope.topic.clone(),
            partition: envelope.partition,
            offset: envelope.offset,
            source,
        };

        let msg = envelope_to_table(&self.lua, envelope).map_err(execution)?;
        let (commit, stop, pass, msg) = self
            .process
            .call::<(bool, bool, bool, Value)>(msg)
            .map_err(execution)?;

        let verdict = Verdict { pass, stop, commit };
        let message = if self.mode.publish && verdict.pass {
            let message = table_to_outgoing(&self.lua, msg, self.mode.raw).map_err(|source| {
                FilterError::InvalidMessage {
                    topic: envelope.topic.clone(),
                    partition: envelope.partition,
                    offset: envelope.offset,
                    source,
                }
            })?;
            Some(message)
        } else {
            None
        };

        Ok(Evaluation { verdict, message })
    }
}

fn install_helpers(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();

    let json = lua.create_table()?;
    json.set(
        "decode",
        lua.create_function(|lua, text: mlua::String| {
            let value: serde_json::Value =
                serde_json::from_slice(&text.as_bytes()).map_err(mlua::Error::external)?;
            lua.to_value(&value)
        })?,
    )?;
    json.set(
        "encode",
        lua.create_function(|lua, value: Value| {
            let value: serde_json::Value = lua.from_value(value)?;
            Ok(value.to_string())
        })?,
    )?;
    json.set("null", lua.null())?;
    globals.set("json", json)?;

    globals.set(
        "log",
        lua.create_function(|_, message: String| {
            info!(target: "filter_script", "{}", message);
            Ok(())
        })?,
    )?;

    Ok(())
}
