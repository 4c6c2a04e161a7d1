use std::{
    io::BufRead,
    path::{Path, PathBuf},
};

use anyhow::bail;
use itertools::Itertools;
use serde::{
    de::{Error, Visitor},
    Deserialize, Serialize,
};

/// Expected rendering of a successful evaluation.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TestOutput {
    Number(i64),
    Text(String),
}

const ERROR_NAMES: [&str; 6] = [
    "OutOfMemory",
    "UnboundSymbol",
    "BadApply",
    "AssignUndeclared",
    "MalformedInput",
    "WrongType",
];

/// One line of an expected-output file: the output, or the error's name.
pub struct Expected(Result<TestOutput, String>);

impl From<Expected> for Result<TestOutput, String> {
    fn from(value: Expected) -> Self {
        value.0
    }
}

struct ExpectedVisitor {}

impl<'de> Deserialize<'de> for Expected {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(ExpectedVisitor {})
    }
}

impl<'de> Visitor<'de> for ExpectedVisitor {
    type Value = Expected;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            "A structure containing the boolean key 'ok'. If it's okay, contains the key 'output', otherwise the key 'type'"
        )
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::MapAccess<'de>,
    {
        if map.next_key::<String>()? != Some("ok".to_owned()) {
            return Err(A::Error::custom("First key should be 'ok'"));
        }

        let ok: bool = map.next_value()?;
        let second = if ok { "output" } else { "type" };
        if map.next_key::<String>()?.as_deref().ok_or(A::Error::custom("Must have two keys"))? != second {
            return Err(A::Error::custom(format!("Second key should be '{}'", second)));
        }

        let result = if ok {
            Expected(Ok(map.next_value::<TestOutput>()?))
        } else {
            let name: String = map.next_value()?;
            if !ERROR_NAMES.contains(&name.as_str()) {
                return Err(A::Error::custom(format!("Unrecognized error type: {}", name)));
            }
            Expected(Err(name))
        };

        if map.next_key::<String>()?.is_some() {
            return Err(A::Error::custom("Only two keys should be present"));
        }

        Ok(result)
    }
}

fn load_input_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<String>> {
    let source = std::fs::read(path)?;
    Ok(source.lines().collect::<Result<Vec<String>, _>>()?)
}

fn load_output_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<Expected>> {
    let source = std::fs::read(path)?;
    let result: Vec<Expected> = serde_json::from_slice(&source)?;
    Ok(result)
}

pub fn load_test_pair(testcase: usize) -> anyhow::Result<Vec<(String, Result<TestOutput, String>)>> {
    if !all_testcases().any(|known| known == testcase) {
        bail!("Testcase out of bounds");
    }

    let base_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let input = load_input_file(base_path.join("test_inputs").join(format!("{}.lisp", testcase)))?;
    let output = load_output_file(base_path.join("test_outputs").join(format!("{}.json", testcase)))?;

    if input.len() != output.len() {
        bail!("Input and output of testcase {} do not match", testcase);
    }
    Ok(input
        .into_iter()
        .zip(output.into_iter().map(Result::from))
        .collect_vec())
}

pub fn all_testcases() -> impl Iterator<Item = usize> {
    1..=8usize
}
