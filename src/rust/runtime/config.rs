// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::std::{
    fs::File,
    io::Read,
    ops::Index,
    str::FromStr,
};
use ::yaml_rust::{
    yaml::Hash,
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Constants
//======================================================================================================================

// Dispatcher options. Every option may be overridden by an environment variable named after the option, upper-cased
// and prefixed with `ENV_PREFIX`.
mod dispatcher_config {
    pub const SECTION_NAME: &str = "dispatcher";
    // Prefix of the name of each coroutine thread.
    pub const THREAD_NAME_PREFIX: &str = "thread_name_prefix";
    // Stack size of each coroutine thread, in bytes.
    pub const STACK_SIZE: &str = "stack_size";
    // Capture a backtrace whenever a coroutine panics, and whenever it blocks if `RUST_LIB_BACKTRACE` or
    // `RUST_BACKTRACE` enables backtraces.
    pub const CAPTURE_STACK_TRACES: &str = "capture_stack_traces";
}

const ENV_PREFIX: &str = "DETCORO_";

const DEFAULT_THREAD_NAME_PREFIX: &str = "coroutine-";

//======================================================================================================================
// Structures
//======================================================================================================================

/// Dispatcher configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Yaml);

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Config {
    /// Reads a configuration file into a [Config] object.
    pub fn new(config_path: &str) -> Result<Self, Fail> {
        let mut config_s: String = String::new();
        File::open(config_path)?.read_to_string(&mut config_s)?;
        Self::from_yaml_str(&config_s)
    }

    /// Parses a YAML document into a [Config] object.
    pub fn from_yaml_str(config_s: &str) -> Result<Self, Fail> {
        let config: Vec<Yaml> = match YamlLoader::load_from_str(config_s) {
            Ok(config) => config,
            Err(e) => {
                let fail: Fail = Fail::from(e);
                error!("from_yaml_str(): {}", fail);
                return Err(fail);
            },
        };
        let config_obj: &Yaml = match &config[..] {
            [] => return Ok(Self::default()),
            [c] => c,
            _ => return Err(Fail::new(libc::EINVAL, "Wrong number of config objects")),
        };
        match config_obj {
            Yaml::Hash(_) => Ok(Self(config_obj.clone())),
            _ => Err(Fail::new(libc::EINVAL, "configuration root is not a mapping")),
        }
    }

    /// Reads the prefix given to the name of every coroutine thread.
    pub fn thread_name_prefix(&self) -> Result<String, Fail> {
        if let Some(prefix) = Self::get_typed_env_option(dispatcher_config::THREAD_NAME_PREFIX)? {
            return Ok(prefix);
        }
        match self.get_dispatcher_config()? {
            Some(section) => Self::get_typed_option(section, dispatcher_config::THREAD_NAME_PREFIX, |yaml: &Yaml| {
                yaml.as_str().map(str::to_string)
            })
            .map(|prefix: Option<String>| prefix.unwrap_or_else(|| DEFAULT_THREAD_NAME_PREFIX.to_string())),
            None => Ok(DEFAULT_THREAD_NAME_PREFIX.to_string()),
        }
    }

    /// Reads the stack size of coroutine threads. None means the platform default.
    pub fn stack_size(&self) -> Result<Option<usize>, Fail> {
        if let Some(size) = Self::get_typed_env_option(dispatcher_config::STACK_SIZE)? {
            return Ok(Some(size));
        }
        match self.get_dispatcher_config()? {
            Some(section) => Self::get_int_option(section, dispatcher_config::STACK_SIZE),
            None => Ok(None),
        }
    }

    /// Reads whether backtraces are captured at suspension points and panics.
    pub fn capture_stack_traces(&self) -> Result<bool, Fail> {
        if let Some(capture) = Self::get_typed_env_option(dispatcher_config::CAPTURE_STACK_TRACES)? {
            return Ok(capture);
        }
        match self.get_dispatcher_config()? {
            Some(section) => {
                Self::get_typed_option(section, dispatcher_config::CAPTURE_STACK_TRACES, &Yaml::as_bool)
                    .map(|capture: Option<bool>| capture.unwrap_or(true))
            },
            None => Ok(true),
        }
    }

    fn get_dispatcher_config(&self) -> Result<Option<&Yaml>, Fail> {
        match self.0.index(dispatcher_config::SECTION_NAME) {
            Yaml::BadValue | Yaml::Null => Ok(None),
            section @ Yaml::Hash(_) => Ok(Some(section)),
            _ => {
                let message: String = format!("parameter \"{}\" has unexpected type", dispatcher_config::SECTION_NAME);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
        }
    }

    /// Index `yaml` to find the value at `index`. A missing option yields None; an option the receiver rejects is an
    /// error.
    fn get_typed_option<'a, T, Fn>(yaml: &'a Yaml, index: &str, receiver: Fn) -> Result<Option<T>, Fail>
    where
        Fn: FnOnce(&'a Yaml) -> Option<T>,
    {
        let option: &'a Yaml = match yaml.index(index) {
            Yaml::BadValue | Yaml::Null => return Ok(None),
            value => value,
        };
        match receiver(option) {
            Some(value) => Ok(Some(value)),
            None => {
                let message: String = format!("parameter {} has unexpected type", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
        }
    }

    /// Similar to `get_typed_option` using `Yaml::as_i64` as the receiver, but additionally verifies that the
    /// destination type may hold the i64 value.
    fn get_int_option<T: TryFrom<i64>>(yaml: &Yaml, index: &str) -> Result<Option<T>, Fail> {
        let val: i64 = match Self::get_typed_option(yaml, index, &Yaml::as_i64)? {
            Some(val) => val,
            None => return Ok(None),
        };
        match T::try_from(val) {
            Ok(val) => Ok(Some(val)),
            _ => {
                let message: String = format!("parameter \"{}\" is out of range", index);
                Err(Fail::new(libc::ERANGE, message.as_str()))
            },
        }
    }

    /// Get value where the environment value overrides the config file if it exists.
    fn get_typed_env_option<T: FromStr>(index: &str) -> Result<Option<T>, Fail> {
        let name: String = format!("{}{}", ENV_PREFIX, index.to_uppercase());
        if let Ok(var) = ::std::env::var(&name) {
            if let Ok(value) = var.as_str().parse() {
                return Ok(Some(value));
            } else {
                let message: String = format!("environment variable {} has unexpected type", name);
                return Err(Fail::new(libc::EINVAL, message.as_str()));
            }
        }
        Ok(None)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for Config {
    fn default() -> Self {
        Self(Yaml::Hash(Hash::new()))
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
