use std::path::Path;

use nalgebra::DMatrix;
use volflow::matrix_io::read_confounds;
use volflow::nifti_io::{read_nifti_4d_file, read_nifti_file, NiftiData4D};
use volflow::{fmrivols2conn_with_masker, Atlas, LabelsMasker, VolflowConfig, VolflowError};

use crate::cli::ConnArgs;
use crate::exit_codes;
use crate::output;

/// Configuration file (or defaults) with command-line overrides applied
fn resolve_config(args: &ConnArgs) -> Result<VolflowConfig, VolflowError> {
    let mut config = match &args.config {
        Some(path) => VolflowConfig::load(path)?,
        None => VolflowConfig::default(),
    };

    if let Some(kind) = args.kind {
        config.connectivity.kind = kind;
    }
    if let Some(estimator) = args.estimator {
        config.connectivity.estimator = estimator;
    }
    if let Some(strategy) = args.strategy {
        config.masker.strategy = strategy;
    }
    if let Some(standardize) = args.standardize {
        config.masker.standardize = standardize;
    }
    if let Some(background) = args.background {
        config.masker.background_label = background;
    }
    if args.detrend {
        config.masker.detrend = true;
    }
    if args.vectorize {
        config.connectivity.vectorize = true;
        config.connectivity.discard_diagonal = args.discard_diagonal;
    }
    Ok(config)
}

fn load_atlas(args: &ConnArgs) -> Result<Atlas, VolflowError> {
    let atlas = Atlas::load(&args.atlas)?;
    match &args.labels {
        Some(path) => atlas.with_label_names(path),
        None => Ok(atlas),
    }
}

fn load_mask(path: &Path, atlas: &Atlas) -> Result<Vec<u8>, VolflowError> {
    let mask = read_nifti_file(path)?;
    if mask.dims != atlas.dims() {
        return Err(VolflowError::ShapeMismatch(format!(
            "mask shape {:?} does not match atlas shape {:?}",
            mask.dims,
            atlas.dims()
        )));
    }
    Ok(mask.data.iter().map(|&v| u8::from(v > 0.0)).collect())
}

fn load_inputs(args: &ConnArgs) -> Result<(Vec<NiftiData4D>, Option<Vec<DMatrix<f64>>>), VolflowError> {
    if let Some(confounds) = &args.confounds {
        if confounds.len() != args.volumes.len() {
            return Err(VolflowError::InvalidConfounds(format!(
                "{} confound files for {} volumes",
                confounds.len(),
                args.volumes.len()
            )));
        }
    }
    let volumes = args
        .volumes
        .iter()
        .map(|p| read_nifti_4d_file(p))
        .collect::<Result<Vec<_>, _>>()?;
    let confounds = args
        .confounds
        .as_ref()
        .map(|paths| paths.iter().map(|p| read_confounds(p)).collect::<Result<Vec<_>, _>>())
        .transpose()?;
    Ok((volumes, confounds))
}

pub fn execute(args: ConnArgs) -> i32 {
    let config = match resolve_config(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    let atlas = match load_atlas(&args) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    let masker = match LabelsMasker::new(&atlas, config.masker) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };
    let masker = match &args.mask {
        Some(path) => match load_mask(path, &atlas).and_then(|mask| masker.with_mask(&mask)) {
            Ok(m) => m,
            Err(e) => {
                eprintln!("Error: {}", e);
                return exit_codes::INPUT_ERROR;
            }
        },
        None => masker,
    };

    let (volumes, confounds) = match load_inputs(&args) {
        Ok(inputs) => inputs,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    log::info!(
        "Computing {} over {} regions from {} volume(s)",
        config.connectivity.kind,
        masker.regions().len(),
        volumes.len()
    );

    let result = match fmrivols2conn_with_masker(&masker, &volumes, confounds.as_deref(), &config.connectivity) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::for_error(&e);
        }
    };

    let written = match args.output.as_deref() {
        Some(path) if output::is_table_path(path) => output::write_table(&result, path),
        path => result
            .to_json(args.compact)
            .map_err(|e| e.to_string())
            .and_then(|json| output::write_output(&json, path)),
    };
    if let Err(e) = written {
        eprintln!("Error: {}", e);
        return exit_codes::EXECUTION_ERROR;
    }

    exit_codes::SUCCESS
}
