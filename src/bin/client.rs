use rustyline::{DefaultEditor, error::ReadlineError};

use futures::{SinkExt, TryStreamExt};
use rskv::engine::{Command, ResultSet};
use rskv::error::RSKVError;
use std::{error::Error, net::SocketAddr};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use std::env;

pub struct Client {
    stream: TcpStream,
}

impl Client {
    pub async fn new(addr: SocketAddr) -> Result<Self, Box<dyn Error>> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self { stream })
    }

    pub async fn execute_command(&mut self, command: Command) -> Result<(), Box<dyn Error>> {
        let (r, w) = self.stream.split();
        let mut sink = FramedWrite::new(w, LengthDelimitedCodec::new());
        let mut stream = FramedRead::new(r, LengthDelimitedCodec::new());

        // 发送命令并执行
        sink.send(bincode::serialize(&command)?.into()).await?;

        // 拿到结果并打印
        if let Some(frame) = stream.try_next().await? {
            match bincode::deserialize::<Result<ResultSet, RSKVError>>(&frame)? {
                Ok(rs) => println!("{}", rs),
                Err(e) => println!("{}", e),
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let addr = env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8080".to_string());
    let addr = addr.parse::<SocketAddr>()?;
    let mut client = Client::new(addr).await?;

    let mut editor = DefaultEditor::new()?;
    loop {
        let readline = editor.readline("rskv> ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.len() > 0 {
                    if line == "exit" || line == "quit" {
                        break;
                    }
                    editor.add_history_entry(line)?;
                    // 解析错误在本地打印，不发往服务端
                    match Command::parse(line) {
                        Ok(command) => client.execute_command(command).await?,
                        Err(e) => println!("{}", e),
                    }
                }
            }
            Err(ReadlineError::Interrupted) => break,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error reading line: {}", err);
                break;
            }
        }
    }

    Ok(())
}
