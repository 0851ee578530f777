use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::Error;
use crate::Result;

const PARAM_SEPARATOR: char = ':';
const LIST_SEPARATOR: char = ',';

/// Who the cached data belongs to. Rendered into the key as `owner=<tag>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataOwner {
    #[serde(rename = "org")]
    OrganizationOwned,
    #[default]
    #[serde(rename = "public")]
    PublicData,
    #[serde(rename = "shared")]
    SharedData,
    #[serde(rename = "user")]
    UserOwned,
    #[serde(rename = "userOrg")]
    UserOrgOwned,
}

impl DataOwner {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataOwner::OrganizationOwned => "org",
            DataOwner::PublicData => "public",
            DataOwner::SharedData => "shared",
            DataOwner::UserOwned => "user",
            DataOwner::UserOrgOwned => "userOrg",
        }
    }
}

impl fmt::Display for DataOwner {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_schema_version() -> u32 {
    1
}

fn default_service() -> String {
    "unknown".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOptions {
    pub operation: String,

    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    #[serde(default = "default_service")]
    pub service: String,

    #[serde(default)]
    pub data_owner: DataOwner,
}

impl KeyOptions {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            schema_version: default_schema_version(),
            service: default_service(),
            data_owner: DataOwner::default(),
        }
    }

    pub fn schema_version(
        mut self,
        schema_version: u32,
    ) -> Self {
        self.schema_version = schema_version;
        self
    }

    pub fn service(
        mut self,
        service: impl Into<String>,
    ) -> Self {
        self.service = service.into();
        self
    }

    pub fn data_owner(
        mut self,
        data_owner: DataOwner,
    ) -> Self {
        self.data_owner = data_owner;
        self
    }

    /// Fixed part of every key built from these options
    fn prefix(&self) -> String {
        format!(
            "{}#v{}{PARAM_SEPARATOR}service={}{PARAM_SEPARATOR}owner={}",
            self.operation, self.schema_version, self.service, self.data_owner
        )
    }
}

pub struct KeyGenerator;

impl KeyGenerator {
    /// Returns a function that builds cache keys for one operation.
    ///
    /// `P` must serialize to a flat map of parameters. Parameters are
    /// rendered as `name=value` sorted by name, so field order never changes
    /// the key:
    ///
    /// ```text
    /// getCustomer#v1:service=unknown:owner=public:companyName=name:user=123
    /// ```
    ///
    /// Sequences are joined with commas. Nested maps are rendered as JSON.
    pub fn key_factory<P>(options: KeyOptions) -> impl Fn(&P) -> Result<String> + Send + Sync + Clone
    where
        P: Serialize + ?Sized,
    {
        let prefix = options.prefix();
        move |params: &P| build_key(&prefix, serde_json::to_value(params)?)
    }
}

fn build_key(
    prefix: &str,
    params: Value,
) -> Result<String> {
    let params = match params {
        Value::Object(map) => map,
        Value::Null => Default::default(),
        other => {
            return Err(Error::InvalidKeyParameters(format!(
                "expected a map of parameters, got {other}"
            )))
        }
    };

    let mut pairs: Vec<(String, Value)> = params.into_iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    let mut key = prefix.to_string();
    for (name, value) in pairs {
        key.push(PARAM_SEPARATOR);
        key.push_str(&name);
        key.push('=');
        key.push_str(&render(&value));
    }
    Ok(key)
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => render(other),
            })
            .collect::<Vec<_>>()
            .join(&LIST_SEPARATOR.to_string()),
        other => other.to_string(),
    }
}
