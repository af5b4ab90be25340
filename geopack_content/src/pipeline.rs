use std::fmt;

use geopack_shared::log::info;

use crate::{
    common::{check_directory, check_file, TEMP_MODEL_EXTENSION},
    config::PipelineConfig,
    lod_replicator::{replicate_lods, LodReport},
    process_runner::{PackerInvocation, ProcessRunner, RunSummary},
    reconciler::{clear_directory, copy_forward_visuals, flatten_geometry, purge_files_with_extension, remove_lod_cache},
    reconciler::{CopyReport, FlattenReport, PurgeReport},
    tag_stripper::{strip_shape_tags, TagStripReport},
    Result,
};

/// Label of the output lines of the old packer.
pub const OLD_PACKER_LABEL: &str = "OLD";

/// Label of the output lines of the new packer.
pub const NEW_PACKER_LABEL: &str = "NEW";

/// Steps of a pipeline run in the order in which they are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    ValidateEnvironment,
    ClearTemp,
    ClearOutput,
    PurgeTempModels,
    RemoveLodCache,
    StripShapeTags,
    ReplicateLods,
    RunOldPacker,
    RunNewPacker,
    FlattenGeometry,
    CopyVisuals,
}

impl Step {
    pub const ALL: [Step; 11] = [
        Step::ValidateEnvironment,
        Step::ClearTemp,
        Step::ClearOutput,
        Step::PurgeTempModels,
        Step::RemoveLodCache,
        Step::StripShapeTags,
        Step::ReplicateLods,
        Step::RunOldPacker,
        Step::RunNewPacker,
        Step::FlattenGeometry,
        Step::CopyVisuals,
    ];
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = match self {
            Step::ValidateEnvironment => "Validating environment",
            Step::ClearTemp => "Clearing temporary directory",
            Step::ClearOutput => "Clearing output directory",
            Step::PurgeTempModels => "Deleting stale temp models",
            Step::RemoveLodCache => "Deleting LOD directory",
            Step::StripShapeTags => "Stripping shape suffixes",
            Step::ReplicateLods => "Generating LOD variants",
            Step::RunOldPacker => "Packing with the old packer",
            Step::RunNewPacker => "Updating with the new packer",
            Step::FlattenGeometry => "Moving geometry files",
            Step::CopyVisuals => "Copying visual files",
        };
        write!(f, "{description}")
    }
}

/// What every step of a successful run did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PipelineReport {
    pub purged_temp_models: PurgeReport,
    pub removed_lod_cache: bool,
    pub stripped_tags: TagStripReport,
    pub lods: LodReport,
    pub old_packer: RunSummary,
    pub new_packer: RunSummary,
    pub flattened: FlattenReport,
    pub copied: CopyReport,
}

/// Converts the source tree into the upgraded output tree.
///
/// # Example
///
/// ```rust,no_run
/// use geopack_content::{config::PipelineConfig, pipeline::Pipeline};
/// let config = PipelineConfig::load(".", None).unwrap();
/// let report = Pipeline::new(config).run().unwrap();
/// println!("{} visual files copied", report.copied.copied);
/// ```
pub struct Pipeline {
    config: PipelineConfig,
    runner: ProcessRunner,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let runner = config.process_runner();
        Self { config, runner }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Checks that the source, temporary and output directories and both packers exist.
    pub fn validate_environment(&self) -> Result<()> {
        for directory in [self.config.source_path(), self.config.temp_path(), self.config.output_path()] {
            check_directory(&directory)?;
        }
        check_file(&self.config.old_packer_path())?;
        check_file(&self.config.new_packer_path())?;
        Ok(())
    }

    /// Executes all [`Step`]s. The first step that fails ends the run and leaves the
    /// directories as they are.
    pub fn run(&self) -> Result<PipelineReport> {
        let config = &self.config;
        let source = config.source_path();
        let lod_root = config.lod_path();
        let temp = config.temp_path();
        let output = config.output_path();
        let mut report = PipelineReport::default();

        for step in Step::ALL {
            info!("=== {step} ===");
            match step {
                Step::ValidateEnvironment => self.validate_environment()?,
                Step::ClearTemp => clear_directory(&temp)?,
                Step::ClearOutput => clear_directory(&output)?,
                Step::PurgeTempModels => report.purged_temp_models = purge_files_with_extension(&source, TEMP_MODEL_EXTENSION),
                Step::RemoveLodCache => report.removed_lod_cache = remove_lod_cache(&lod_root),
                Step::StripShapeTags => report.stripped_tags = strip_shape_tags(&source)?,
                Step::ReplicateLods => report.lods = replicate_lods(&source, &lod_root, config.lod_copies)?,
                Step::RunOldPacker => {
                    let invocation = PackerInvocation::new(OLD_PACKER_LABEL, config.old_packer_path(), &source, &temp);
                    report.old_packer = self.runner.run(&invocation)?;
                }
                Step::RunNewPacker => {
                    let invocation = PackerInvocation::new(NEW_PACKER_LABEL, config.new_packer_path(), &temp, &output)
                        .with_flags(config.update_flags.iter().cloned());
                    report.new_packer = self.runner.run(&invocation)?;
                }
                Step::FlattenGeometry => report.flattened = flatten_geometry(&output)?,
                Step::CopyVisuals => {
                    let source_roots = [source.clone(), lod_root.clone()];
                    report.copied = copy_forward_visuals(&source_roots, &config.lod_dir_name, &output)?;
                }
            }
        }

        info!("Finished successfully, output directory: {}", output.display());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use geopack_shared::function_name;
    use geopack_test::{setup_logger, temp_root, write_file};

    use super::*;
    use crate::Error;

    fn create_directories(config: &PipelineConfig) {
        for directory in [config.source_path(), config.temp_path(), config.output_path()] {
            fs::create_dir_all(&directory).unwrap();
        }
    }

    #[test]
    fn steps_are_unique() {
        for (index, step) in Step::ALL.iter().enumerate() {
            assert!(!Step::ALL[index + 1..].contains(step), "{step:?} appears twice");
        }
    }

    #[test]
    fn validation_requires_source() {
        setup_logger();
        let root = temp_root(function_name!());
        let pipeline = Pipeline::new(PipelineConfig::for_base_dir(root.path()));
        assert!(matches!(pipeline.validate_environment(), Err(Error::MissingDirectory(_))));
    }

    #[test]
    fn validation_requires_packers() {
        setup_logger();
        let root = temp_root(function_name!());
        let config = PipelineConfig::for_base_dir(root.path());
        create_directories(&config);
        write_file(root.path(), &config.old_packer, "");
        let pipeline = Pipeline::new(config);
        match pipeline.validate_environment() {
            Err(Error::MissingFile(path)) => assert_eq!(path, pipeline.config().new_packer_path()),
            other => panic!("expected MissingFile but got {other:?}"),
        }
    }

    #[test]
    fn validation_requires_temp_and_output() {
        setup_logger();
        let root = temp_root(function_name!());
        let config = PipelineConfig::for_base_dir(root.path());
        fs::create_dir_all(config.source_path()).unwrap();
        write_file(root.path(), &config.old_packer, "");
        write_file(root.path(), &config.new_packer, "");
        let pipeline = Pipeline::new(config);
        match pipeline.validate_environment() {
            Err(Error::MissingDirectory(path)) => assert_eq!(path, pipeline.config().temp_path()),
            other => panic!("expected MissingDirectory but got {other:?}"),
        }

        fs::create_dir_all(pipeline.config().temp_path()).unwrap();
        match pipeline.validate_environment() {
            Err(Error::MissingDirectory(path)) => assert_eq!(path, pipeline.config().output_path()),
            other => panic!("expected MissingDirectory but got {other:?}"),
        }

        fs::create_dir_all(pipeline.config().output_path()).unwrap();
        assert!(pipeline.validate_environment().is_ok());
    }

    #[test]
    fn validation_rejects_output_file() {
        setup_logger();
        let root = temp_root(function_name!());
        let config = PipelineConfig::for_base_dir(root.path());
        fs::create_dir_all(config.source_path()).unwrap();
        fs::create_dir_all(config.temp_path()).unwrap();
        write_file(root.path(), &config.output_dir, "not a directory");
        let pipeline = Pipeline::new(config);
        assert!(matches!(pipeline.validate_environment(), Err(Error::NotADirectory(_))));
    }

    #[test]
    fn failed_validation_changes_nothing() {
        setup_logger();
        let root = temp_root(function_name!());
        let config = PipelineConfig::for_base_dir(root.path());
        create_directories(&config);
        let stale = write_file(&config.source_path(), "stale.temp_model", "");
        let leftover = write_file(&config.temp_path(), "leftover.geometry", "");
        let pipeline = Pipeline::new(config);
        assert!(matches!(pipeline.run(), Err(Error::MissingFile(_))));
        assert!(stale.exists());
        assert!(leftover.exists());
    }
}
