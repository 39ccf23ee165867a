use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::classify::ClassifierOptions;
use crate::dataset::{AUTO_NAME, GeneratedBy};
use crate::domain::{DatasetFamily, ExistsPolicy, PhaseEncodingDirection, TransferMethod};
use crate::error::ConvertError;
use crate::runs::RunOrder;

pub const DEFAULT_CONFIG_FILE: &str = "hcp2bids.json";

/// On-disk configuration; every field may be omitted.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub output_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub method: Option<TransferMethod>,
    #[serde(default)]
    pub pe_dirs: Option<Vec<PhaseEncodingDirection>>,
    #[serde(default)]
    pub use_bids_uris: Option<bool>,
    #[serde(default)]
    pub overwrite: Option<bool>,
    #[serde(default)]
    pub exists_ok: Option<bool>,
    #[serde(default)]
    pub sort_by_name: Option<bool>,
    #[serde(default)]
    pub grad_unwarp: Option<bool>,
    #[serde(default)]
    pub t1w_use_derived: Option<bool>,
    #[serde(default)]
    pub t2w_use_derived: Option<bool>,
    #[serde(default)]
    pub skip_bias: Option<bool>,
    #[serde(default)]
    pub skip: Vec<String>,
    #[serde(default)]
    pub sidecar_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Values given on the command line. Flags only ever switch behavior on.
#[derive(Debug, Clone, Default)]
pub struct ConvertOverrides {
    pub output_dir: Option<Utf8PathBuf>,
    pub dry_run: bool,
    pub overwrite: bool,
    pub strict: bool,
    pub method: Option<TransferMethod>,
    pub use_bids_uris: bool,
    pub pe_dirs: Option<Vec<PhaseEncodingDirection>>,
    pub sort_by_name: bool,
    pub grad_unwarp: bool,
    pub t1w_use_derived: bool,
    pub t2w_use_derived: bool,
    pub keep_bias: bool,
    pub skip: Vec<String>,
    pub sidecar_dir: Option<Utf8PathBuf>,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub output_dir: Utf8PathBuf,
    pub dry_run: bool,
    pub method: TransferMethod,
    pub exists_policy: ExistsPolicy,
    pub run_order: RunOrder,
    pub sidecar_dir: Option<Utf8PathBuf>,
    pub name: String,
    pub classifier: ClassifierOptions,
    pub generated_by: GeneratedBy,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `hcp2bids.json` in the working directory when it exists.
    pub fn resolve(path: Option<&str>) -> Result<Config, ConvertError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| ConvertError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| ConvertError::ConfigParse(err.to_string()))
    }

    /// Layers family profile, file config and command line, later layers winning.
    pub fn resolve_options(
        family: Option<DatasetFamily>,
        config: Config,
        overrides: ConvertOverrides,
        generated_by: GeneratedBy,
    ) -> Result<ConvertOptions, ConvertError> {
        let output_dir = overrides
            .output_dir
            .or(config.output_dir)
            .ok_or_else(|| ConvertError::MissingOption("output_dir".to_string()))?;

        let directions = overrides
            .pe_dirs
            .or(config.pe_dirs)
            .or_else(|| family.map(DatasetFamily::default_directions))
            .unwrap_or_else(|| DatasetFamily::Lifespan.default_directions());

        let sort_by_name = overrides.sort_by_name
            || config
                .sort_by_name
                .unwrap_or_else(|| family.is_some_and(DatasetFamily::sorts_runs_by_name));
        let run_order = if sort_by_name {
            RunOrder::Name
        } else {
            RunOrder::AcquisitionTime
        };

        let overwrite = overrides.overwrite || config.overwrite.unwrap_or(false);
        let exists_ok = !overrides.strict && config.exists_ok.unwrap_or(true);

        let name = overrides
            .name
            .or(config.name)
            .unwrap_or_else(|| {
                family
                    .map(DatasetFamily::default_name)
                    .unwrap_or(AUTO_NAME)
                    .to_string()
            });

        let mut skip = config.skip;
        skip.extend(overrides.skip);

        let classifier = ClassifierOptions {
            directions,
            skip,
            skip_bias: !overrides.keep_bias && config.skip_bias.unwrap_or(true),
            t1w_use_derived: overrides.t1w_use_derived || config.t1w_use_derived.unwrap_or(false),
            t2w_use_derived: overrides.t2w_use_derived || config.t2w_use_derived.unwrap_or(false),
            grad_unwarp: overrides.grad_unwarp || config.grad_unwarp.unwrap_or(false),
            use_bids_uris: overrides.use_bids_uris || config.use_bids_uris.unwrap_or(false),
        };

        Ok(ConvertOptions {
            output_dir,
            dry_run: overrides.dry_run,
            method: overrides
                .method
                .or(config.method)
                .unwrap_or(TransferMethod::Hardlink),
            exists_policy: ExistsPolicy::from_flags(overwrite, exists_ok),
            run_order,
            sidecar_dir: overrides.sidecar_dir.or(config.sidecar_dir),
            name,
            classifier,
            generated_by,
        })
    }
}
