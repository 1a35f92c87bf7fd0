//! 测试用的本地 HTTP 服务：axum 跑在独立线程的 tokio 运行时上，
//! 被测代码用阻塞客户端走真实 socket 访问。

use std::net::SocketAddr;
use std::sync::mpsc;
use std::thread;

use axum::Router;

pub(crate) struct MockServer {
    pub(crate) base: String,
}

impl MockServer {
    pub(crate) fn spawn(router: Router) -> Self {
        let (tx, rx) = mpsc::channel::<SocketAddr>();
        thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .enable_all()
                .build()
                .expect("mock server runtime");
            rt.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind mock server");
                tx.send(listener.local_addr().expect("mock server addr"))
                    .expect("report mock server addr");
                axum::serve(listener, router).await.expect("serve mock server");
            });
        });
        let addr = rx.recv().expect("mock server address");
        Self {
            base: format!("http://{addr}"),
        }
    }
}
