//! `a3sist status`: configuration summary

use crate::server::config::AppConfig;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("a3sist v{}\n", env!("CARGO_PKG_VERSION"));

    println!("Processor");
    println!("  max concurrent tasks   {}", config.processor.max_concurrent_tasks);
    println!("  error backoff          {}ms", config.processor.error_backoff_ms);

    println!("Queue");
    println!("  capacity               {}", config.queue.max_queue_size);
    println!("  dequeue timeout        {}ms", config.queue.dequeue_timeout_ms);
    println!("  aging threshold        {}s", config.queue.aging_threshold_secs);

    println!("Agents");
    println!(
        "  default agent          {}",
        config.agents.default_agent.as_deref().unwrap_or("(none)")
    );
    println!(
        "  coalesce requests      {}",
        if config.agents.coalesce_requests { "on" } else { "off" }
    );

    println!("Workflow");
    println!("  default retries        {}", config.workflow.default_retries);
    println!("  stop on failure        {}", config.workflow.stop_on_failure);

    println!("Tools");
    println!("  concurrent requests    {}", config.tools.max_concurrent_requests);
    println!("  outbound calls         {}", config.tools.max_outbound_calls);
    println!("  call timeout           {}ms", config.tools.call_timeout_ms);
    for server in &config.tools.servers {
        println!(
            "  - {:<20} {} [{}]",
            server.name,
            server.endpoint,
            server.tools.join(", ")
        );
    }

    Ok(())
}
