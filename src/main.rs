use std::net::SocketAddr;

use clap::Parser;
use resplan::cli::{
    Args, build_config, handle_create_user, init_logging, load_password, open_database,
};
use resplan::{create_app, init_cleanup};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    if let Some(login) = args.create_user.as_deref() {
        let Some(password) = load_password() else {
            std::process::exit(1);
        };
        if !handle_create_user(&db, login, args.display_name.as_deref(), password).await {
            std::process::exit(1);
        }
    }

    let config = build_config(&args, db);
    init_cleanup(&config).await;

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    let local_addr = listener.local_addr().unwrap_or_else(|e| {
        error!(error = %e, "Failed to read listener address");
        std::process::exit(1);
    });

    let app = create_app(&config);

    info!(address = %local_addr, "Listening");

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, make_service).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
