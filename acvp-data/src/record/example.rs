//! Building and reading `tf.train.Example` payloads, restricted to what a video-prediction record holds.

use anyhow::Result;
use prost::Message;

use crate::error::DataError;
use crate::proto::tensorflow::feature::Kind;
use crate::proto::tensorflow::{BytesList, Example, Feature, Features, Int64List};

pub fn int64_feature(value: i64) -> Feature {
    Feature {
        kind: Some(Kind::Int64List(Int64List { value: vec![value] })),
    }
}

pub fn bytes_feature(value: Vec<u8>) -> Feature {
    Feature {
        kind: Some(Kind::BytesList(BytesList { value: vec![value] })),
    }
}

pub fn example<I>(features: I) -> Example
where
    I: IntoIterator<Item = (&'static str, Feature)>,
{
    Example {
        features: Some(Features {
            feature: features.into_iter().map(|(k, f)| (k.to_string(), f)).collect(),
        }),
    }
}

pub fn decode(payload: &[u8]) -> Result<Example> {
    Example::decode(payload).map_err(|e| DataError::MalformedRecord(format!("example: {e}")).into())
}

pub fn single_int64(
    example: &Example,
    key: &str,
) -> Result<i64> {
    match &feature(example, key)?.kind {
        Some(Kind::Int64List(list)) if list.value.len() == 1 => Ok(list.value[0]),
        other => Err(wrong_feature(key, "one int64", other.as_ref())),
    }
}

pub fn single_bytes<'a>(
    example: &'a Example,
    key: &str,
) -> Result<&'a [u8]> {
    match &feature(example, key)?.kind {
        Some(Kind::BytesList(list)) if list.value.len() == 1 => Ok(&list.value[0]),
        other => Err(wrong_feature(key, "one bytes value", other.as_ref())),
    }
}

fn feature<'a>(
    example: &'a Example,
    key: &str,
) -> Result<&'a Feature> {
    example
        .features
        .as_ref()
        .and_then(|f| f.feature.get(key))
        .ok_or_else(|| DataError::MalformedRecord(format!("missing feature '{key}'")).into())
}

fn wrong_feature(
    key: &str,
    expected: &str,
    actual: Option<&Kind>,
) -> anyhow::Error {
    let actual = match actual {
        Some(Kind::BytesList(l)) => format!("{} bytes values", l.value.len()),
        Some(Kind::FloatList(l)) => format!("{} floats", l.value.len()),
        Some(Kind::Int64List(l)) => format!("{} int64s", l.value.len()),
        None => "an empty feature".to_string(),
    };
    DataError::MalformedRecord(format!("feature '{key}': expected {expected}, got {actual}")).into()
}
