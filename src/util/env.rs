//! Environment configuration.
//!
//! The deserializer is a cut-down take on the [`envy`] crate: every variable in the process
//! environment (plus `.env`, if present) is fed through serde as a flat string map, and numeric
//! fields are parsed on the way through so `Config` can use real types.
//!
//! [`envy`]: https://github.com/softprops/envy

use serde::Deserialize;
use serde::de::value::MapDeserializer;
use serde::de::{self, IntoDeserializer};
use thiserror::Error;

pub const DEFAULT_LOG_FILTER: &str =
    "loyalty_points=debug,tower_http=debug,axum=debug,sqlx=info,info";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Config {
    pub database_url: String,
    pub admin_token: String,
    pub customer_token_secret: String,
    #[serde(default = "default_port")]
    pub server_api_port: u16,
    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,
    #[serde(default = "default_cors")]
    pub cors_allow_origins: String,
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,
    #[serde(default = "default_service_name")]
    pub api_service_name: String,
    #[serde(default = "default_tracer_name")]
    pub api_tracer_name: String,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

#[inline]
const fn default_port() -> u16 {
    8080
}

#[inline]
const fn default_max_connections() -> u32 {
    10
}

fn default_cors() -> String {
    String::from("*")
}

fn default_service_name() -> String {
    String::from("loyalty-api")
}

fn default_tracer_name() -> String {
    String::from("loyalty-tracer")
}

fn default_log_filter() -> String {
    String::from(DEFAULT_LOG_FILTER)
}

impl Config {
    /// Loads `.env` (if one exists) into the process environment, then deserializes the
    /// environment into a `Config`
    pub fn from_env() -> EnvResult<Self> {
        match dotenvy::dotenv() {
            Ok(_) => (),
            Err(e) if e.not_found() => (),
            Err(e) => return Err(e.into()),
        }

        Ok(from_iter(std::env::vars())?)
    }

    /// The OTLP collector endpoint, treating an empty variable the same as an unset one
    pub fn otlp_endpoint(&self) -> Option<&str> {
        self.otel_exporter_otlp_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

// ---
//  Deserializer implementation
// ---

struct Val(String, String);
struct Varname(String);

impl<'de> IntoDeserializer<'de, EnvDeserializeError> for Val {
    type Deserializer = Self;
    fn into_deserializer(self) -> Self::Deserializer {
        self
    }
}

impl<'de> IntoDeserializer<'de, EnvDeserializeError> for Varname {
    type Deserializer = Self;
    fn into_deserializer(self) -> Self::Deserializer {
        self
    }
}

macro_rules! forward_parsed_vals {
    ($($ty:ident => $method:ident,)*) => {
        $(
            fn $method<V>(self, visitor: V) -> Result<V::Value, EnvDeserializeError>
            where
                V: de::Visitor<'de>
            {
                match self.1.trim().parse::<$ty>() {
                    Ok(val) => val.into_deserializer().$method(visitor),
                    Err(e) => Err(de::Error::custom(format_args!(
                        "{}: while parsing '{}' (variable: {})",
                        e, self.1, self.0
                    ))),
                }
            }
        )*
    };
}

impl<'de> de::Deserializer<'de> for Val {
    type Error = EnvDeserializeError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.1.into_deserializer().deserialize_any(visitor)
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_some(self)
    }

    fn deserialize_newtype_struct<V>(
        self,
        _: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    forward_parsed_vals! {
        bool => deserialize_bool,
        u16 => deserialize_u16,
        u32 => deserialize_u32,
        u64 => deserialize_u64,
        i32 => deserialize_i32,
        i64 => deserialize_i64,
    }

    serde::forward_to_deserialize_any! {
        i8 i16 u8 f32 f64 char str string unit bytes byte_buf map seq
        unit_struct tuple_struct identifier tuple enum
        ignored_any struct
    }
}

impl<'de> de::Deserializer<'de> for Varname {
    type Error = EnvDeserializeError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.0.into_deserializer().deserialize_any(visitor)
    }

    serde::forward_to_deserialize_any! {
        char str string unit seq option bytes byte_buf map newtype_struct
        unit_struct tuple_struct identifier tuple ignored_any
        bool u8 u16 u32 u64 i8 i16 i32 i64 f32 f64 enum struct
    }
}

pub fn from_iter<Iter, T>(iter: Iter) -> Result<T, EnvDeserializeError>
where
    T: de::DeserializeOwned,
    Iter: IntoIterator<Item = (String, String)>,
{
    let vars = iter
        .into_iter()
        .map(|(k, v)| (Varname(k.clone()), Val(k, v)));

    T::deserialize(MapDeserializer::new(vars))
}

impl de::Error for EnvDeserializeError {
    fn custom<T>(msg: T) -> Self
    where
        T: std::fmt::Display,
    {
        EnvDeserializeError::Custom(msg.to_string())
    }

    fn missing_field(field: &'static str) -> Self {
        EnvDeserializeError::MissingValue(field.to_ascii_uppercase())
    }
}

pub type EnvResult<T> = core::result::Result<T, EnvErr>;

#[derive(Debug, Error)]
pub enum EnvErr {
    #[error(transparent)]
    Dotenvy(#[from] dotenvy::Error),

    #[error(transparent)]
    DeserializationError(#[from] EnvDeserializeError),
}

#[derive(Debug, Error)]
pub enum EnvDeserializeError {
    #[error("env deserialization error: {0}")]
    Custom(String),

    #[error("missing required environment variable {0}")]
    MissingValue(String),
}
