use futures::SinkExt;
use rskv::engine::{Command, Session};
use rskv::error::{RSKVError, RSKVResult};
use rskv::storage::mvcc::{IsolationLevel, Mvcc};
use tokio::net::{TcpListener, TcpStream};
use tokio_stream::StreamExt;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use std::env;

// cargo run --bin server [addr] [isolation-level] [--debug]
pub struct ServerSession {
    session: Session,
    debug: bool,
}

impl ServerSession {
    pub fn new(db: Mvcc, debug: bool) -> Self {
        Self {
            session: Session::new(db),
            debug,
        }
    }

    pub async fn handle_request(&mut self, socket: TcpStream) -> RSKVResult<()> {
        let mut frames = Framed::new(socket, LengthDelimitedCodec::new());
        while let Some(result) = frames.next().await {
            match result {
                Ok(frame) => {
                    // 解码并执行命令
                    let res = match bincode::deserialize::<Command>(&frame) {
                        Ok(command) => {
                            if self.debug {
                                println!("executing command: {:?}", command);
                            }
                            self.session.execute(command)
                        }
                        Err(e) => Err(RSKVError::from(e)),
                    };
                    // 内部错误说明连接已违反协议约定，应答后断开
                    let fatal = matches!(&res, Err(RSKVError::Internal(_)));
                    // 发送执行结果
                    let response = bincode::serialize(&res)?;
                    if let Err(e) = frames.send(response.into()).await {
                        println!("error on sending response; error = {:?}", e);
                    }
                    if fatal {
                        break;
                    }
                }
                Err(e) => {
                    println!("error on receiving frame; error = {:?}", e);
                    break;
                }
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> RSKVResult<()> {
    let debug = env::args().any(|arg| arg == "--debug");
    let args = env::args()
        .skip(1)
        .filter(|arg| arg != "--debug")
        .collect::<Vec<_>>();
    let addr = args
        .first()
        .cloned()
        .unwrap_or_else(|| "127.0.0.1:8080".to_string());
    let isolation = match args.get(1) {
        Some(level) => level.parse::<IsolationLevel>()?,
        None => IsolationLevel::ReadCommitted,
    };

    // 启动 TCP 服务
    let listener = TcpListener::bind(&addr).await?;
    println!(
        "rskv server started, listening on {} (isolation level: {:?})",
        addr, isolation
    );
    // 初始化 DB，所有连接共享同一个引擎
    let db = Mvcc::new(isolation);
    loop {
        match listener.accept().await {
            Ok((socket, _)) => {
                let mut ss = ServerSession::new(db.clone(), debug);
                tokio::spawn(async move {
                    if let Err(e) = ss.handle_request(socket).await {
                        println!("error on handling connection; error = {:?}", e);
                    }
                });
            }
            Err(e) => {
                println!("error on accepting connection; error = {:?}", e);
            }
        }
    }
}
