use clap::Parser;
use sales_etl::utils::error::ErrorSeverity;
use sales_etl::utils::{logger, validation::Validate};
use sales_etl::{CliConfig, EtlConfig, EtlEngine, EtlError, RunResult, SalesPipeline, SqliteDestination};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliConfig::parse();

    // 載入並驗證配置
    let config = match args.resolve().and_then(|config| config.validate().map(|_| config)) {
        Ok(config) => config,
        Err(e) => {
            logger::init_cli_logger(args.verbose);
            fail(&e);
        }
    };

    // 初始化日誌
    if config.json_logs() {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(args.verbose);
    }

    tracing::info!("🚀 Starting sales-etl ({})", config.pipeline.name);
    if args.verbose {
        tracing::debug!("Resolved config: {:?}", config);
    }

    // --json 時 stdout 只輸出執行結果
    if !args.json {
        display_config_summary(&config, &args);
    }

    if args.dry_run {
        tracing::info!("🔍 DRY RUN MODE - No actual processing will occur");
        return Ok(());
    }

    let monitor_enabled = args.monitor || config.monitoring_enabled();
    if monitor_enabled {
        tracing::info!("🔍 System monitoring enabled");
    }

    // 建立目的表連線，生命週期由這裡管理
    let destination = match SqliteDestination::connect_with_busy_timeout(
        config.database_url(),
        config.max_connections(),
        config.table(),
        config.load_timeout(),
    )
    .await
    {
        Ok(destination) => destination,
        Err(e) => fail(&e),
    };

    if config.create_table() {
        if let Err(e) = destination.ensure_schema().await {
            destination.close().await;
            fail(&e);
        }
    }

    let pipeline = match SalesPipeline::from_config(&config) {
        Ok(pipeline) => pipeline,
        Err(e) => fail(&e),
    };
    let engine = EtlEngine::new_with_monitoring(pipeline, monitor_enabled);

    // Ctrl-C 在階段之間中止，未提交的寫入會回滾
    let token = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, aborting run");
            token.cancel();
        }
    });

    let result = engine.run(config.source_path(), &destination).await;
    destination.close().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    if !result.succeeded() {
        std::process::exit(exit_code_for(&result));
    }

    Ok(())
}

fn fail(e: &EtlError) -> ! {
    tracing::error!(
        "❌ {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());
    std::process::exit(exit_code(e.severity()));
}

// 根據錯誤嚴重程度決定退出碼
fn exit_code(severity: ErrorSeverity) -> i32 {
    match severity {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2, // 可重試
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    }
}

fn exit_code_for(result: &RunResult) -> i32 {
    if result.retryable {
        2
    } else {
        1
    }
}

fn print_result(result: &RunResult) {
    if result.succeeded() {
        println!("✅ ETL run {} succeeded", result.run_id);
    } else {
        println!(
            "❌ ETL run {} failed at {}: {}",
            result.run_id,
            result
                .failed_stage
                .map(|s| s.to_string())
                .unwrap_or_else(|| "startup".to_string()),
            result.error_message.as_deref().unwrap_or("unknown error")
        );
        if result.retryable {
            println!("💡 The run is safe to retry");
        }
    }
    println!("  Extracted:   {}", result.rows_extracted);
    println!("  Quarantined: {}", result.rows_quarantined);
    println!("  Loaded:      {}", result.rows_loaded);
    if result.succeeded() {
        println!("  Revenue:     {}", result.summary.total_revenue);
    }
    for row in result.quarantined.iter().take(10) {
        println!("  ⚠️  line {}: {}", row.line, row.reason);
    }
    if result.quarantined.len() > 10 {
        println!("  ... {} more quarantined rows", result.quarantined.len() - 10);
    }
}

fn display_config_summary(config: &EtlConfig, args: &CliConfig) {
    println!("📋 Configuration Summary:");
    println!("  Pipeline: {}", config.pipeline.name);
    if let Some(schedule) = &config.pipeline.schedule {
        println!("  Schedule: {} (external scheduler)", schedule);
    }
    println!("  Source: {}", config.source.path);
    println!("  Destination: {} / {}", config.database_url(), config.table());
    println!("  Precision: {} decimal places (half-up)", config.precision());
    println!(
        "  Timeouts: read {:?}, load {:?}",
        config.source_timeout(),
        config.load_timeout()
    );

    if args.dry_run {
        println!("  🔍 DRY RUN MODE ENABLED");
    }

    println!();
}
