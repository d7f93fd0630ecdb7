pub mod archive;
pub mod backup_run;
pub mod destination;
pub mod encrypt;
pub mod file_ext;
pub mod hash;
pub mod hooks;
pub mod job;
pub mod job_config;
pub mod progress;
pub mod record;
pub mod redacted;
pub mod restore;
pub mod result_error;
pub mod retention;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
