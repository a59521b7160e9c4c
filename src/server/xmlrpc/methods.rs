use std::collections::BTreeMap;

use super::codec::{MethodCall, Value};
use crate::error::{Error, Result};
use crate::store::{BuildCatalog, BuildIndex};
use crate::types::TagRecord;

/// Fault code for a method the hub does not implement.
pub const FAULT_UNSUPPORTED_METHOD: i32 = -32601;
/// Fault code for arguments of the wrong shape.
pub const FAULT_INVALID_PARAMS: i32 = -32602;
/// Koji's `GenericError`.
pub const FAULT_GENERIC: i32 = 1000;

/// Koji keyword arguments arrive as a trailing struct carrying this marker.
const KWARGS_MARKER: &str = "__starstar";

/// Position of `arches` in Koji's `listRPMs` signature.
const LIST_RPMS_ARCHES_POSITION: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcMethod {
    Sum,
    GetPackageId,
    ListBuilds,
    ListTags,
    ListRpms,
    ListArchives,
}

impl RpcMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sum" => Some(Self::Sum),
            "getPackageID" => Some(Self::GetPackageId),
            "listBuilds" => Some(Self::ListBuilds),
            "listTags" => Some(Self::ListTags),
            "listRPMs" => Some(Self::ListRpms),
            "listArchives" => Some(Self::ListArchives),
            _ => None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::GetPackageId => "getPackageID",
            Self::ListBuilds => "listBuilds",
            Self::ListTags => "listTags",
            Self::ListRpms => "listRPMs",
            Self::ListArchives => "listArchives",
        }
    }

    #[must_use]
    fn needs_index(&self) -> bool {
        !matches!(self, Self::Sum | Self::ListArchives)
    }
}

/// Fault code reported for `err`.
#[must_use]
pub fn fault_code(err: &Error) -> i32 {
    match err {
        Error::UnsupportedMethod(_) => FAULT_UNSUPPORTED_METHOD,
        Error::BadRequest(_) | Error::MalformedIdentifier(_) | Error::InvalidPath(_) => {
            FAULT_INVALID_PARAMS
        }
        _ => FAULT_GENERIC,
    }
}

/// Runs one call against a fresh index from `catalog`.
pub fn dispatch(catalog: &dyn BuildCatalog, call: &MethodCall) -> Result<Value> {
    let method = RpcMethod::from_name(&call.name)
        .ok_or_else(|| Error::UnsupportedMethod(call.name.clone()))?;
    let args = Args::new(&call.params);

    if !method.needs_index() {
        return match method {
            RpcMethod::Sum => sum(&args),
            _ => Ok(Value::Array(Vec::new())),
        };
    }

    let index = catalog.snapshot()?;
    match method {
        RpcMethod::GetPackageId => get_package_id(&index, &args),
        RpcMethod::ListBuilds => list_builds(&index, &args),
        RpcMethod::ListTags => list_tags(&index, &args),
        RpcMethod::ListRpms => list_rpms(&index, &args),
        RpcMethod::Sum | RpcMethod::ListArchives => Ok(Value::Array(Vec::new())),
    }
}

fn sum(args: &Args<'_>) -> Result<Value> {
    if args.positional.is_empty() {
        return Err(Error::BadRequest("sum needs at least one integer".to_string()));
    }

    let mut total: i64 = 0;
    for value in args.positional {
        let term = value
            .as_int()
            .ok_or_else(|| Error::BadRequest(format!("sum takes integers, got {value:?}")))?;
        total = total
            .checked_add(term)
            .ok_or_else(|| Error::BadRequest("sum overflows".to_string()))?;
    }
    Ok(Value::Int(total))
}

fn get_package_id(index: &BuildIndex, args: &Args<'_>) -> Result<Value> {
    let name = args.string(0, &["info", "name"])?;
    Ok(Value::from(index.package_id(name)))
}

fn list_builds(index: &BuildIndex, args: &Args<'_>) -> Result<Value> {
    let Some(package_id) = args.id(0, &["packageID", "packageId"])? else {
        return Ok(Value::Array(Vec::new()));
    };

    let records = index
        .builds_for_package(package_id)?
        .into_iter()
        .map(|build| Value::from_serialize(&build.record()))
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::Array(records))
}

fn list_tags(index: &BuildIndex, args: &Args<'_>) -> Result<Value> {
    let Some(build) = args
        .id(0, &["buildID", "buildId", "build"])?
        .and_then(|id| index.build_by_id(id))
    else {
        return Ok(Value::Array(Vec::new()));
    };

    let tags = index
        .tags_for(build)
        .into_iter()
        .map(|name| Value::from_serialize(&TagRecord { name }))
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::Array(tags))
}

fn list_rpms(index: &BuildIndex, args: &Args<'_>) -> Result<Value> {
    let Some(build) = args
        .id(0, &["buildID", "buildId", "build"])?
        .and_then(|id| index.build_by_id(id))
    else {
        return Ok(Value::Array(Vec::new()));
    };
    let arches = args.strings(LIST_RPMS_ARCHES_POSITION, &["arches"])?;

    let rpms = index
        .artifacts_for(build, &arches)?
        .iter()
        .map(Value::from_serialize)
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::Array(rpms))
}

fn label<'n>(names: &[&'n str]) -> &'n str {
    names.first().copied().unwrap_or("argument")
}

/// Positional and keyword arguments of one call.
struct Args<'a> {
    positional: &'a [Value],
    named: Option<&'a BTreeMap<String, Value>>,
}

impl<'a> Args<'a> {
    fn new(params: &'a [Value]) -> Self {
        match params.split_last() {
            Some((Value::Struct(members), rest))
                if members.contains_key(KWARGS_MARKER) || rest.is_empty() =>
            {
                Self {
                    positional: rest,
                    named: Some(members),
                }
            }
            _ => Self {
                positional: params,
                named: None,
            },
        }
    }

    fn get(&self, position: usize, names: &[&str]) -> Option<&'a Value> {
        let named = self
            .named
            .and_then(|members| names.iter().find_map(|name| members.get(*name)));
        named
            .or_else(|| self.positional.get(position))
            .filter(|value| **value != Value::Nil)
    }

    /// An id argument. Ids outside the 31-bit range can never match anything.
    fn id(&self, position: usize, names: &[&str]) -> Result<Option<i32>> {
        match self.get(position, names) {
            None => Ok(None),
            Some(Value::Int(i)) => Ok(i32::try_from(*i).ok()),
            Some(Value::String(s)) => Ok(s.trim().parse().ok()),
            Some(other) => Err(Error::BadRequest(format!(
                "{} must be an integer, got {other:?}",
                label(names)
            ))),
        }
    }

    fn string(&self, position: usize, names: &[&str]) -> Result<&'a str> {
        self.get(position, names)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::BadRequest(format!("{} must be a string", label(names))))
    }

    /// A list of strings; a single string counts as a list of one.
    fn strings(&self, position: usize, names: &[&str]) -> Result<Vec<String>> {
        match self.get(position, names) {
            None => Ok(Vec::new()),
            Some(Value::String(s)) => Ok(vec![s.clone()]),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        Error::BadRequest(format!("{} must hold strings", label(names)))
                    })
                })
                .collect(),
            Some(other) => Err(Error::BadRequest(format!(
                "{} must be a list, got {other:?}",
                label(names)
            ))),
        }
    }
}
