// 模块结构：
// `application`: 启动逻辑与路由注册。
// `handlers`: 各端点的处理函数与错误响应。
// `request_context`: 客户端标识与追踪上下文。
// `state`: 共享应用状态。
mod application;
mod handlers;
mod request_context;
mod state;


use std::io;

#[actix_web::main]
async fn main() -> io::Result<()> {
    // 启动失败时打印到标准错误并以非零状态码退出。
    if let Err(err) = application::run().await {
        eprintln!("[api] bootstrap failed: {err}");
        return Err(io::Error::other(err.to_string()));
    }

    Ok(())
}
