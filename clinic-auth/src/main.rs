use clinic_auth::{
    build_router,
    config::{BootstrapAdminConfig, ClinicAuthConfig, OtpMode},
    services::{
        AcceptAnyCodeOtp, AdminSignup, AuthEngine, AuthError, EngineParts,
        InMemoryAdminRequestStore, InMemoryIdentityStore, InMemoryOtpStore, InMemoryScheduleStore,
        NotificationGateway, OtpAuthority, OtpEngine, SystemClock, TelegramGateway,
    },
    utils::PlainSecret,
    AppState,
};
use service_core::error::AppError;
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = ClinicAuthConfig::from_env()?;

    init_tracing(&config.service_name, &config.log_level);

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        otp_mode = ?config.otp.mode,
        "Starting clinic authentication service"
    );

    let clock = Arc::new(SystemClock);
    let gateway: Arc<dyn NotificationGateway> =
        Arc::new(TelegramGateway::new(&config.telegram).map_err(AppError::ConfigError)?);
    tracing::info!("Telegram gateway initialized");

    let otp: Arc<dyn OtpAuthority> = match config.otp.mode {
        OtpMode::Live => Arc::new(
            OtpEngine::new(Arc::new(InMemoryOtpStore::new()), gateway.clone(), clock.clone())
                .with_ttl(config.otp_ttl()),
        ),
        OtpMode::AcceptAny => {
            Arc::new(AcceptAnyCodeOtp::new(clock.clone()).with_ttl(config.otp_ttl()))
        }
    };

    let engine = AuthEngine::assemble(EngineParts {
        identities: Arc::new(InMemoryIdentityStore::new()),
        admin_requests: Arc::new(InMemoryAdminRequestStore::new()),
        otp,
        schedule: Arc::new(InMemoryScheduleStore::new()),
        gateway,
        clock,
        resend_cooldown: config.resend_cooldown(),
    });

    if let Some(bootstrap) = &config.bootstrap_admin {
        bootstrap_super_admin(&engine, bootstrap).await?;
    }

    let login_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.login_attempts,
        config.rate_limit.login_window_seconds,
    );
    let ip_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.global_ip_limit,
        config.rate_limit.global_ip_window_seconds,
    );
    tracing::info!("Rate limiters initialized: Login and Global IP");

    let shutdown = CancellationToken::new();
    let scheduler_task = engine
        .scheduler
        .clone()
        .spawn(config.scheduler_tick(), shutdown.child_token());

    let state = AppState {
        config: config.clone(),
        engine,
        login_rate_limiter,
        ip_rate_limiter,
    };
    let app = build_router(state).await?;

    let addr = config.common.socket_addr();

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    shutdown.cancel();
    if let Err(e) = scheduler_task.await {
        tracing::error!(error = %e, "Scheduler task ended abnormally");
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn bootstrap_super_admin(
    engine: &AuthEngine,
    bootstrap: &BootstrapAdminConfig,
) -> Result<(), AppError> {
    let signup = AdminSignup {
        name: bootstrap.name.clone(),
        email: bootstrap.email.clone(),
        phone: bootstrap.phone.clone(),
        secret: PlainSecret::new(bootstrap.password.clone()),
        telegram: bootstrap.telegram_channel_id.clone(),
    };

    match engine.admin_requests.bootstrap_super_admin(signup).await {
        Ok(seeded) => {
            tracing::info!(
                identity_id = %seeded.identity_id,
                expires_at = %seeded.token.expires_at,
                "Bootstrap super admin ready; sign in with the configured password"
            );
            Ok(())
        }
        Err(AuthError::Conflict(_)) => {
            tracing::info!("Bootstrap super admin already exists");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
