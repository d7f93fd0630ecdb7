//! # backup_engine
//!
//! Backup, restore and retention for a set of local paths.
//!
//! ## Features
//!
//! - **Archives**: zip (Deflate) or tar.gz of any number of files and directories
//! - **Encryption**: AES-256-GCM with a PBKDF2-HMAC-SHA256 derived key
//! - **Checksums**: SHA-256 of every artifact, optionally re-verified after upload
//! - **Destinations**: local directories and SFTP servers, uploaded independently
//! - **Retention**: keep the newest N artifacts or everything younger than an age
//! - **Progress**: typed progress events over a callback or an `mpsc` channel
//!
//! ## Quick Start
//!
//! ```no_run
//! use backup_engine::backup::job::spawn_job;
//! use backup_engine::backup::job_config::JobConfig;
//!
//! let job = JobConfig::load("job.yml".as_ref())?;
//! let (handle, progress) = spawn_job(job);
//! for event in progress {
//!     println!("[{}] {:>3}% {}", event.level, event.percent, event.message);
//! }
//! let outcome = handle.join().expect("backup thread panicked");
//! assert!(outcome.ok());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
