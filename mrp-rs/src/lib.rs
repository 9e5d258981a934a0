use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Failures while loading a run request or writing its artifacts.
#[derive(Error, Debug)]
pub enum MrpError {
    #[error("no run request on stdin")]
    EmptyInput,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid TOML run request: {0}")]
    Toml(#[from] toml::de::Error),

    /// The `input` table does not match the model's input type.
    #[error("invalid model input: {0}")]
    Input(#[source] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type MrpResult<T> = Result<T, MrpError>;

/// A single model run: the model input plus where its artifacts go.
pub struct Environment<I = ()> {
    input_json: serde_json::Map<String, Value>,
    pub input: I,
    output: Value,
}

impl Environment {
    pub fn from_json(data: Value) -> Self {
        let input_json = data
            .get("input")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        let output = data.get("output").cloned().unwrap_or(Value::Null);

        Self {
            input_json,
            input: (),
            output,
        }
    }

    pub fn from_json_str(raw: &str) -> MrpResult<Self> {
        let data: Value = serde_json::from_str(raw)?;
        Ok(Self::from_json(data))
    }

    /// TOML requests use the same `input` / `output` tables as JSON ones.
    pub fn from_toml_str(raw: &str) -> MrpResult<Self> {
        let data: Value = toml::from_str(raw)?;
        Ok(Self::from_json(data))
    }

    pub fn from_reader(mut reader: impl Read) -> MrpResult<Self> {
        let mut raw = String::new();
        reader.read_to_string(&mut raw)?;
        if raw.trim().is_empty() {
            return Err(MrpError::EmptyInput);
        }
        Self::from_json_str(&raw)
    }

    pub fn from_stdin() -> MrpResult<Self> {
        Self::from_reader(io::stdin().lock())
    }

    /// Reads a request file, as TOML when the extension is `.toml` and as JSON otherwise.
    pub fn from_path(path: &Path) -> MrpResult<Self> {
        let raw = fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_toml {
            Self::from_toml_str(&raw)
        } else {
            Self::from_json_str(&raw)
        }
    }

    pub fn with_input_type<I: DeserializeOwned>(self) -> MrpResult<Environment<I>> {
        let input_value = Value::Object(self.input_json.clone());
        let input = serde_json::from_value(input_value).map_err(MrpError::Input)?;
        Ok(Environment {
            input_json: self.input_json,
            input,
            output: self.output,
        })
    }
}

impl<I: DeserializeOwned> Environment<I> {
    /// Loads from `path` when given, stdin otherwise.
    pub fn load(path: Option<&Path>) -> MrpResult<Self> {
        let env = match path {
            Some(path) => Environment::from_path(path)?,
            None => Environment::from_stdin()?,
        };
        env.with_input_type::<I>()
    }
}

impl<I> Environment<I> {
    pub fn input_json(&self) -> &serde_json::Map<String, Value> {
        &self.input_json
    }

    pub fn output_dir(&self) -> Option<PathBuf> {
        let output = &self.output;

        // Flat output
        if output.get("spec").is_some() {
            return filesystem_dir(output);
        }

        // Profiled output, `default` wins over the first listed profile
        let profiles = output.get("profile").and_then(|v| v.as_object())?;
        let profile = profiles
            .get("default")
            .or_else(|| profiles.values().next())?;
        filesystem_dir(profile)
    }

    /// Writes `data` to `filename` in the output directory, or to stdout.
    /// Returns the SHA-256 hex digest of the bytes written.
    pub fn write(&self, filename: &str, data: &[u8]) -> MrpResult<String> {
        if let Some(dir) = self.output_dir() {
            fs::create_dir_all(&dir)?;
            fs::write(dir.join(filename), data)?;
        } else {
            let mut stdout = io::stdout().lock();
            stdout.write_all(data)?;
            stdout.flush()?;
        }
        Ok(sha256_hex(data))
    }

    pub fn write_csv(
        &self,
        filename: &str,
        headers: &[&str],
        rows: &[Vec<String>],
    ) -> MrpResult<String> {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        wtr.write_record(headers)?;
        for row in rows {
            wtr.write_record(row)?;
        }
        let data = wtr
            .into_inner()
            .map_err(|err| MrpError::Io(err.into_error()))?;
        self.write(filename, &data)
    }

    pub fn write_json<T: Serialize>(&self, filename: &str, value: &T) -> MrpResult<String> {
        let mut data = serde_json::to_vec_pretty(value)?;
        data.push(b'\n');
        self.write(filename, &data)
    }
}

fn filesystem_dir(output: &Value) -> Option<PathBuf> {
    if output.get("spec").and_then(|v| v.as_str()) != Some("filesystem") {
        return None;
    }
    output
        .get("dir")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
