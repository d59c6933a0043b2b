use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::grammar::{self, Rule};
use crate::message::{Params, Uri};

/// A `"display name" <uri>;params` header value, as carried by From, To,
/// Contact, Route and Record-Route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAddrHeader {
    display_name: Option<String>,
    uri: Uri,
    params: Params,
}

impl NameAddrHeader {
    pub fn new(uri: Uri, display_name: Option<&str>, params: Params) -> Self {
        Self {
            display_name: display_name.map(str::to_owned),
            uri,
            params,
        }
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn uri_mut(&mut self) -> &mut Uri {
        &mut self.uri
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn set_display_name(&mut self, display_name: Option<&str>) {
        self.display_name = display_name.map(str::to_owned);
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<Option<&str>> {
        self.params.get(name)
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params.contains(name)
    }

    pub fn set_param(&mut self, name: &str, value: Option<&str>) {
        self.params.set(name, value);
    }

    pub fn delete_param(&mut self, name: &str) -> Option<Option<String>> {
        self.params.remove(name)
    }

    pub fn clear_params(&mut self) {
        self.params.clear();
    }

    /// Returns the `tag` parameter value.
    pub fn tag(&self) -> Option<&str> {
        self.params.value("tag")
    }
}

impl fmt::Display for NameAddrHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(display_name) = &self.display_name {
            write!(f, "\"{}\" ", quote(display_name))?;
        }
        write!(f, "<{}>{}", self.uri, self.params)
    }
}

impl FromStr for NameAddrHeader {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        grammar::parse(s, Rule::NameAddrHeader)?
            .into_name_addr()
            .map_err(|_| Error::InvalidArgument(format!("not a name-addr: {}", s)))
    }
}

fn quote(display_name: &str) -> String {
    display_name.replace('\\', "\\\\").replace('"', "\\\"")
}
