// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::LazyLock;

/// Any non-empty value forces filesystem sockets; unset or empty prefers the
/// abstract namespace where the platform has one.
pub const ENV_NO_ABSTRACT_NAMESPACE_SOCKETS: &str = "PASSENGER_NO_ABSTRACT_NAMESPACE_SOCKETS";

#[derive(Clone, Debug)]
pub struct Config {
    pub abstract_namespace_allowed: bool,
}

static ENV_CONFIG: LazyLock<Config> = LazyLock::new(FromEnv::config);

impl Config {
    pub fn get() -> &'static Self {
        &ENV_CONFIG
    }
}

pub struct FromEnv {}

impl FromEnv {
    fn abstract_namespace_allowed() -> bool {
        if !cfg!(target_os = "linux") {
            return false;
        }
        std::env::var_os(ENV_NO_ABSTRACT_NAMESPACE_SOCKETS).is_none_or(|value| value.is_empty())
    }

    pub fn config() -> Config {
        Config {
            abstract_namespace_allowed: Self::abstract_namespace_allowed(),
        }
    }
}
