use clap::{Parser, Subcommand};
use comfyui_serverless_driver::artifacts::{decode_artifacts, ArtifactStore, FsSink};
use comfyui_serverless_driver::artifacts::store::run_timestamp;
use comfyui_serverless_driver::error::{AppResult, DriverError};
use comfyui_serverless_driver::serverless::JobApi;
use comfyui_serverless_driver::workflow::ops::{
    apply_set_path, missing_classes, node_classes, parse_set_pairs, point_load_image, set_provider,
    stamp_filename_prefix,
};
use comfyui_serverless_driver::workflow::{build_payload, load_any_workflow, load_input_image, load_workflow};
use comfyui_serverless_driver::{Config, JobDriver, JobResult, PollConfig, RunPodClient};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "comfyjob", about = "Run ComfyUI workflows on a serverless endpoint", version)]
struct Cli {
    /// Override RUNPOD_ENDPOINT_URL
    #[arg(global = true, long)]
    endpoint: Option<String>,

    /// Override RUNPOD_API_KEY
    #[arg(global = true, long)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit a workflow, wait for it, and save the output images
    Run {
        /// API-format workflow JSON
        #[arg(long, value_name = "PATH")]
        workflow: PathBuf,
        /// Input image(s) to upload with the job
        #[arg(long = "image", value_name = "PATH")]
        images: Vec<PathBuf>,
        /// Upload name of the first image; LoadImage nodes are pointed at it
        #[arg(long, default_value = "input_image.png")]
        image_name: String,
        /// Overrides as key=value (repeatable), e.g. `17.inputs.model_variant=portrait`
        #[arg(long = "set", value_name = "KEY=VALUE")]
        sets: Vec<String>,
        /// Execution provider for background-removal nodes (CPU, CUDA)
        #[arg(long)]
        provider: Option<String>,
        /// Directory for decoded images and the response record
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
        /// Output filename prefix; a run timestamp is appended
        #[arg(long, default_value = "comfy")]
        prefix: String,
        /// Node classes that must be present before submitting (repeatable)
        #[arg(long = "require", value_name = "CLASS")]
        require: Vec<String>,
        /// Only enforce the overall timeout, no running-phase stall detection
        #[arg(long)]
        basic: bool,
        /// Seconds between status checks
        #[arg(long)]
        poll_interval: Option<u64>,
        /// Overall wait budget in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Print the workflow after overrides, before sending
        #[arg(short, long)]
        verbose: bool,
    },
    /// Print the current status payload of a job
    Status {
        job_id: String,
    },
    /// Ask the endpoint to cancel a job
    Cancel {
        job_id: String,
    },
    /// List workflow nodes and check for required classes
    Check {
        #[arg(long, value_name = "PATH")]
        workflow: PathBuf,
        #[arg(long = "require", value_name = "CLASS")]
        require: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    Config::dotenv_load();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let overrides = (cli.endpoint, cli.api_key);

    match cli.command {
        Commands::Check { workflow, require } => {
            let (classes, missing) = check_workflow(&workflow, &require).await?;
            for (id, class) in classes {
                println!("Node {}: {}", id, class);
            }
            if missing.is_empty() {
                println!("All {} required node classes present", require.len());
                Ok(())
            } else {
                for m in &missing {
                    eprintln!("Missing required node class: {}", m);
                }
                std::process::exit(2);
            }
        }
        Commands::Status { job_id } => {
            let conf = remote_config(overrides)?;
            let client = RunPodClient::new(&conf.endpoint_url, conf.api_key.clone());
            let report = client.job_status(&job_id).await?;
            println!("{}", serde_json::to_string_pretty(&report.raw)?);
            Ok(())
        }
        Commands::Cancel { job_id } => {
            let conf = remote_config(overrides)?;
            let client = RunPodClient::new(&conf.endpoint_url, conf.api_key.clone());
            match client.cancel_job(&job_id).await {
                Ok(()) => {
                    println!("Cancel requested for {}", job_id);
                    Ok(())
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Run {
            workflow, images, image_name, sets, provider, output_dir, prefix,
            require, basic, poll_interval, timeout, verbose,
        } => {
            let conf = remote_config(overrides)?;

            let mut graph = load_workflow(&workflow).await?;
            println!("Loaded workflow {} ({} nodes)", workflow.display(), node_classes(&graph).len());

            let missing = missing_classes(&graph, &require);
            if !missing.is_empty() {
                eprintln!("Workflow is missing required node classes: {}", missing.join(", "));
                std::process::exit(2);
            }

            let timestamp = run_timestamp();
            let stamped = format!("{}_{}", prefix, timestamp);
            if !stamp_filename_prefix(&mut graph, &stamped).is_empty() {
                println!("Set output filename prefix: {}", stamped);
            }
            if let Some(p) = provider.as_deref() {
                for id in set_provider(&mut graph, p) {
                    println!("Node {} provider set to {}", id, p);
                }
            }

            let mut inputs = Vec::with_capacity(images.len());
            for (i, path) in images.iter().enumerate() {
                let name = if i == 0 { Some(image_name.as_str()) } else { None };
                let input = load_input_image(path, name).await?;
                println!("Loaded image {} as {} ({} bytes encoded)", path.display(), input.name, input.base64.len());
                inputs.push(input);
            }
            if let Some(first) = inputs.first() {
                point_load_image(&mut graph, &first.name);
            }

            if !sets.is_empty() {
                let pairs = parse_set_pairs(&sets)?;
                for (path, new_val) in pairs {
                    if !apply_set_path(&mut graph, &path, new_val) {
                        eprintln!("Warning: could not apply --set to path: {}", path.join("."));
                    }
                }
            }

            if verbose {
                eprintln!("[verbose] Workflow:\n{}", serde_json::to_string_pretty(&graph)?);
            }
            let payload = build_payload(graph, &inputs);

            let mut poll: PollConfig = conf.poll_config();
            if basic {
                poll.running_warn_threshold = None;
                poll.running_stall_threshold = None;
            }
            if let Some(secs) = poll_interval {
                poll = poll.with_poll_interval(Duration::from_secs(secs.max(1)));
            }
            if let Some(secs) = timeout {
                poll = poll.with_overall_timeout(Duration::from_secs(secs));
            }

            let client = Arc::new(RunPodClient::new(&conf.endpoint_url, conf.api_key.clone()));
            println!("Submitting to {}", client.base_url());
            let driver = JobDriver::new(client);
            let handle = match driver.submit(&payload).await {
                Ok(h) => h,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            };
            println!("Job ID: {}", handle.id);

            let result = driver.await_completion(&handle, &poll).await;
            let outstanding = driver.flush_cancellations(Duration::from_secs(5)).await;
            if outstanding > 0 {
                eprintln!("Cancel request for {} still in flight", handle.id);
            }
            print_report(&result);

            let out_dir = output_dir.unwrap_or_else(|| PathBuf::from(&conf.output_dir));
            let store = ArtifactStore::new(FsSink::new(&out_dir), prefix).with_timestamp(timestamp);
            if let Some(report) = &result.last_report {
                let location = store.save_response(report).await?;
                println!("Response saved to: {}", location);
            }

            match result.into_result() {
                Ok(done) => {
                    let output = done.output.unwrap_or_default();
                    let batch = decode_artifacts(&output);
                    println!("Images in output: {}", batch.entries());
                    for persisted in store.persist(&batch.artifacts).await? {
                        println!("  Image {}: {} bytes -> {}", persisted.index, persisted.bytes_written, persisted.location);
                    }
                    for index in &batch.skipped {
                        eprintln!("  Image {} has no data", index);
                    }
                    for failure in &batch.failures {
                        eprintln!("  {}", failure);
                    }
                    if !batch.failures.is_empty() {
                        std::process::exit(1);
                    }
                    Ok(())
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    if matches!(e, DriverError::OverallTimeout { .. } | DriverError::StallTimeout { .. }) {
                        eprintln!("The job may still be processing or the worker may be scaling;");
                        eprintln!("check it with `comfyjob status {}` or raise --timeout.", handle.id);
                    }
                    std::process::exit(1);
                }
            }
        }
    }
}

/// Env config plus CLI overrides, validated for remote calls. Only the
/// subcommands that talk to the endpoint load it.
fn remote_config((endpoint, api_key): (Option<String>, Option<String>)) -> AppResult<Config> {
    let mut conf = Config::new()?;
    if let Some(url) = endpoint {
        conf.endpoint_url = url;
    }
    if let Some(key) = api_key {
        conf.api_key = key;
    }
    conf.validate()?;
    Ok(conf)
}

/// Node listing and the required classes the workflow lacks. Either export format works.
async fn check_workflow(path: &Path, require: &[String]) -> AppResult<(Vec<(String, String)>, Vec<String>)> {
    let graph = load_any_workflow(path).await?;
    Ok((node_classes(&graph), missing_classes(&graph, require)))
}

fn print_report(result: &JobResult) {
    let d = &result.diagnostics;
    println!("Job {} finished: {}", result.job_id, result.outcome.as_str());
    println!("  elapsed {}s over {} polls, {} status changes", d.elapsed.as_secs(), d.polls, d.status_changes);
    if let Some(q) = d.queue_duration {
        println!("  queued {}s", q.as_secs());
    }
    if let Some(x) = d.execution_duration {
        println!("  running {}s", x.as_secs());
    }
    if let (Some(delay), Some(exec)) = (d.remote_delay_ms, d.remote_execution_ms) {
        println!("  endpoint reported delay {}ms, execution {}ms", delay, exec);
    }
    if d.warnings > 0 || d.transient_errors > 0 {
        println!("  {} stall warnings, {} failed status checks", d.warnings, d.transient_errors);
    }
    if d.cancel_requested {
        println!("  cancellation requested");
    }
    if let Some(err) = &result.error {
        println!("  error: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn check_ignores_malformed_poll_settings() {
        std::env::set_var("POLL_INTERVAL_SECS", "bogus");
        assert!(Config::new().is_err());

        let dir = tempfile::tempdir().unwrap();
        let ui = dir.path().join("ui.json");
        std::fs::write(
            &ui,
            r#"{"nodes": [{"id": 7, "type": "SaveImage"}, {"id": 1, "type": "LoadImage"}], "links": []}"#,
        )
        .unwrap();

        let (classes, missing) = check_workflow(&ui, &["LoadImage".to_string(), "VAEDecode".to_string()])
            .await
            .unwrap();
        assert_eq!(classes[0], ("1".to_string(), "LoadImage".to_string()));
        assert_eq!(missing, vec!["VAEDecode"]);

        assert!(remote_config((Some("https://api.runpod.ai/v2/x".into()), Some("k".into()))).is_err());
        std::env::remove_var("POLL_INTERVAL_SECS");
    }
}
