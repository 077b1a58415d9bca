pub mod fake_akismet;
pub mod fake_recaptcha;
pub mod fake_smtp;

use simplelog::{ColorChoice, CombinedLogger, Config, LevelFilter, TermLogger, TerminalMode};
use std::{net::SocketAddr, sync::Once};
use tokio::net::TcpListener;

pub fn setup_logging() {
    static LOGGING: Once = Once::new();
    LOGGING.call_once(|| {
        // Another test harness may have installed a logger already.
        let _ = CombinedLogger::init(vec![TermLogger::new(
            LevelFilter::Trace,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        )]);
    });
}

/// Serves `app` on an ephemeral port of the loopback interface and returns the
/// address it listens on.
async fn serve(app: axum::Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    address
}
