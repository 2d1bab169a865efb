use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing::error;
use tracing_subscriber::FmtSubscriber;

/// Address of the mock service shared by every test in the binary.
///
/// The service gets its own runtime on a dedicated thread so it outlives each test's runtime.
#[allow(unused)]
pub fn init() -> SocketAddr {
    static ADDR: OnceLock<SocketAddr> = OnceLock::new();

    *ADDR.get_or_init(|| {
        let _ = FmtSubscriber::builder()
            .with_env_filter("barrage=debug,barrage_core=debug,mock_service=info")
            .try_init();

        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind mock service");
        listener
            .set_nonblocking(true)
            .expect("non-blocking listener");
        let addr = listener.local_addr().expect("mock service address");

        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .expect("mock service runtime");

            rt.block_on(async move {
                let listener =
                    tokio::net::TcpListener::from_std(listener).expect("tokio listener");
                if let Err(err) = mock_service::serve(listener).await {
                    error!("Mock service stopped: {err}");
                }
            });
        });

        addr
    })
}

#[allow(unused)]
pub fn base_url() -> String {
    format!("http://{}", init())
}
