use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use talebill::billing::StoreVerifier;
use talebill::config::Config;
use talebill::db::{AppState, create_pool, init_db, queries};
use talebill::handlers;
use talebill::maintenance::{run_maintenance, spawn_maintenance_task};
use talebill::models::{BillingPlatform, CreatePlan, CreateUser, PlanProductAlias};
use talebill::money::{Currency, parse_amount};

#[derive(Parser, Debug)]
#[command(name = "talebill")]
#[command(about = "Subscription purchase verification for ZarinPal, CafeBazaar and Myket")]
struct Cli {
    /// Seed the database with dev data (plans, store SKU aliases, a user and token)
    #[arg(long)]
    seed: bool,

    /// Delete the database on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,

    /// Run one maintenance pass (expire lapsed subscriptions, fail stale checkouts) and exit
    #[arg(long)]
    run_maintenance: bool,
}

/// (slug, name, price in IRT, features)
const DEV_PLANS: &[(&str, &str, &str, &[&str])] = &[
    ("1month", "اشتراک یک‌ماهه", "99000", &["دسترسی به همه داستان‌ها"]),
    ("3months", "اشتراک سه‌ماهه", "269000", &["دسترسی به همه داستان‌ها", "دانلود آفلاین"]),
    ("6months", "اشتراک شش‌ماهه", "499000", &["دسترسی به همه داستان‌ها", "دانلود آفلاین"]),
    ("1year", "اشتراک یک‌ساله", "899000", &["دسترسی به همه داستان‌ها", "دانلود آفلاین", "پروفایل خانوادگی"]),
];

/// SKUs shipped by older app builds.
const DEV_ALIASES: &[(BillingPlatform, &str, &str)] = &[
    (BillingPlatform::CafeBazaar, "monthly_subscription", "1month"),
    (BillingPlatform::CafeBazaar, "yearly_subscription", "1year"),
    (BillingPlatform::Myket, "sub_monthly", "1month"),
    (BillingPlatform::Myket, "sub_yearly", "1year"),
];

fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    let existing = queries::list_active_plans(&conn).expect("Failed to list plans");
    if !existing.is_empty() {
        tracing::info!("Plans already exist, skipping seed");
        return;
    }

    for (index, (slug, name, price, features)) in DEV_PLANS.iter().enumerate() {
        let plan = queries::create_plan(
            &conn,
            &CreatePlan {
                slug: slug.to_string(),
                name: name.to_string(),
                price: parse_amount(price).expect("Invalid seed price"),
                currency: Currency::Irt,
                duration_days: None,
                cafebazaar_product_id: Some(format!("talebill_{}", slug)),
                myket_product_id: Some(format!("talebill_{}", slug)),
                features: features.iter().map(|f| f.to_string()).collect(),
                sort_order: index as i32,
            },
        )
        .expect("Failed to create plan");
        println!("  plan {:<8} {} ({} IRT, {} days)", plan.slug, plan.id, price, plan.duration_days);
    }

    for (platform, product_id, slug) in DEV_ALIASES {
        queries::create_plan_alias(
            &conn,
            &PlanProductAlias {
                billing_platform: *platform,
                product_id: product_id.to_string(),
                plan_slug: slug.to_string(),
            },
        )
        .expect("Failed to create plan alias");
    }

    let user = queries::create_user(
        &conn,
        &CreateUser {
            name: "Dev User".to_string(),
            mobile: Some("09120000000".to_string()),
            email: Some("dev@talebill.local".to_string()),
        },
    )
    .expect("Failed to create dev user");
    let (_, token) = queries::create_api_token(&conn, &user.id, "dev", None)
        .expect("Failed to create dev token");

    println!();
    println!("============================================================");
    println!("DEV DATA SEEDED");
    println!("============================================================");
    println!("User:   {} ({})", user.name, user.id);
    println!("Token:  {}", token);
    println!();
    println!("  curl -H 'Authorization: Bearer {}' {}/api/v1/subscriptions/status", token, state.base_url);
    println!("============================================================");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "talebill=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    if cli.run_maintenance {
        let conn = db_pool.get().expect("Failed to get connection");
        match run_maintenance(&conn, queries::now(), config.pending_payment_ttl_hours) {
            Ok(report) => {
                println!(
                    "Expired {} subscription(s), failed {} stale payment(s)",
                    report.expired_subscriptions, report.failed_payments
                );
                return;
            }
            Err(e) => {
                eprintln!("Maintenance failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    let state = AppState::from_config(&config, db_pool);

    if cli.seed {
        if config.dev_mode {
            seed_dev_data(&state);
        } else {
            tracing::warn!("--seed ignored outside dev mode (set TALEBILL_ENV=dev)");
        }
    }

    for (name, configured) in [
        ("CafeBazaar", state.cafebazaar.is_configured()),
        ("Myket", state.myket.is_configured()),
        ("ZarinPal", state.zarinpal.is_configured()),
    ] {
        if !configured {
            tracing::warn!("{} credentials not set; its endpoints will answer 503", name);
        }
    }

    spawn_maintenance_task(
        state.db.clone(),
        config.maintenance_interval_secs,
        config.pending_payment_ttl_hours,
    );

    let app = handlers::router(state.clone(), Some(config.rate_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();

    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("talebill listening on {}", addr);

    // Connect info is required for per-IP rate limiting
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        }
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
