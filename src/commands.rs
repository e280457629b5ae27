use mediadl::client::DaemonClient;
use mediadl::humanize::ByteSize;
use mediadl::providers::Progress;
use mediadl::scheduler::{Job, SubmitRequest};

use crate::cli::{AddArgs, CancelArgs, StatusArgs, VpnArgs};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub async fn add(client: &DaemonClient, args: AddArgs) -> Result<(), AnyError> {
    let request = SubmitRequest {
        url: args.url,
        backend: args.backend,
        destination: args.dest,
        priority: args.priority,
        retry: None,
    };

    let accepted = client.submit(&request).await?;
    println!("{} {}", accepted.job_id, accepted.state);
    Ok(())
}

pub async fn list(client: &DaemonClient) -> Result<(), AnyError> {
    let jobs = client.list().await?;
    if jobs.is_empty() {
        println!("no jobs");
        return Ok(());
    }

    println!("{:<36}  {:<10}  {:<10}  {:>7}  {:>19}  URL", "ID", "BACKEND", "STATE", "ATTEMPT", "PROGRESS");
    for job in &jobs {
        println!(
            "{:<36}  {:<10}  {:<10}  {:>7}  {:>19}  {}",
            job.id,
            job.backend,
            job.state,
            job.attempt,
            format_progress(&job.progress),
            job.url
        );
    }
    Ok(())
}

pub async fn status(client: &DaemonClient, args: StatusArgs) -> Result<(), AnyError> {
    match args.id {
        Some(id) => print_job(&client.get(id).await?),
        None => {
            let health = client.health().await?;
            println!("status:    {}", health.status);
            println!("vpn:       {}", health.vpn);
            println!("version:   {}", health.version);
            println!(
                "jobs:      {} submitted, {} completed, {} failed, {} cancelled",
                health.metrics.jobs_submitted,
                health.metrics.jobs_completed,
                health.metrics.jobs_failed,
                health.metrics.jobs_cancelled
            );
            println!(
                "retries:   {}, kill-switch sweeps: {}",
                health.metrics.retries_scheduled, health.metrics.killswitch_sweeps
            );
        }
    }
    Ok(())
}

pub async fn cancel(client: &DaemonClient, args: CancelArgs) -> Result<(), AnyError> {
    let response = client.cancel(args.id).await?;
    if !response.cancelled {
        println!("job already {}", response.job.state);
    }
    print_job(&response.job);
    Ok(())
}

pub async fn vpn(client: &DaemonClient, args: VpnArgs) -> Result<(), AnyError> {
    let status = if args.reconnect {
        client.vpn_reconnect().await?
    } else {
        client.vpn_status().await?
    };

    if !status.enabled {
        println!("vpn:       not required");
    }
    println!("provider:  {}", status.provider);
    println!("state:     {}", status.state);
    println!("public ip: {}", status.public_ip.as_deref().unwrap_or("-"));
    println!("server:    {}", status.server.as_deref().unwrap_or("-"));
    match status.last_health_check {
        Some(at) => println!("checked:   {} ({} failures)", at.to_rfc3339(), status.consecutive_failures),
        None => println!("checked:   never"),
    }
    Ok(())
}

pub async fn providers(client: &DaemonClient) -> Result<(), AnyError> {
    for provider in client.providers().await? {
        println!(
            "{:<10}  {:<8}  {}",
            provider.name,
            if provider.enabled { "enabled" } else { "disabled" },
            if provider.protected { "vpn" } else { "direct" }
        );
    }
    Ok(())
}

fn print_job(job: &Job) {
    println!("id:        {}", job.id);
    println!("url:       {}", job.url);
    println!("backend:   {}", job.backend);
    println!("dest:      {}", job.destination.display());
    println!("state:     {}", job.state);
    println!("attempt:   {}", job.attempt);
    println!("progress:  {}", format_progress(&job.progress));
    if let Some(failure) = &job.last_error {
        println!("error:     {failure}");
    }
    if let Some(reason) = job.cancel_reason {
        println!("reason:    {reason}");
    }
}

fn format_progress(progress: &Progress) -> String {
    let done = ByteSize(progress.bytes_downloaded);
    match (progress.bytes_total, progress.fraction()) {
        (Some(total), Some(fraction)) => {
            format!("{done}/{} {:.0}%", ByteSize(total), fraction * 100.0)
        }
        _ => done.to_string(),
    }
}
