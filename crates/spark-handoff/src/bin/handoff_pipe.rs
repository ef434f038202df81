//! 交接缓冲演示：把标准输入逐行交给若干协作式消费者。
//!
//! # 使用方法
//! ```bash
//! RUST_LOG=spark_handoff=trace cargo run -p spark-handoff --features cli --bin handoff_pipe -- \
//!     --consumers 3 --config handoff.toml < input.txt
//! ```
//! - `--consumers`：可选，消费者任务数量，默认 2；
//! - `--config`：可选，TOML 格式的 [`BufferConfig`]。
//!
//! # 结构（How）
//! - 读取线程是同步生产者：逐行 `push`，线程退出时 `end()`；
//! - 主线程运行单个 `LocalPool`，所有消费者任务在同一调度器上协作，按 `next()`
//!   调用顺序轮流获得行；
//! - 每个消费者输出 `consumer-<id>\t<line>`，结束时打印各自处理的行数。

use std::{
    env, fs,
    io::{self, BufRead},
    path::PathBuf,
    thread,
};

use anyhow::{Context, bail};
use futures::{
    executor::LocalPool,
    task::{LocalSpawnExt, SpawnError},
};
use spark_handoff::{Buffer, BufferConfig, Step};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONSUMERS: usize = 2;

struct Options {
    consumers: usize,
    config: BufferConfig,
}

fn main() {
    install_logging();
    if let Err(error) = run() {
        eprintln!("handoff_pipe 运行失败: {error:#}");
        std::process::exit(1);
    }
}

fn install_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn run() -> anyhow::Result<()> {
    let options = parse_args(env::args().skip(1))?;
    let buffer = Buffer::<String>::with_config(options.config);

    let producer = {
        let closer = CloseOnExit(buffer.clone());
        thread::Builder::new()
            .name("handoff-stdin".to_owned())
            .spawn(move || -> anyhow::Result<usize> {
                let mut produced = 0;
                for line in io::stdin().lock().lines() {
                    let line = line.context("读取标准输入失败")?;
                    closer.0.push(line).context("缓冲在生产结束前被关闭")?;
                    produced += 1;
                }
                Ok(produced)
            })
            .context("无法启动读取线程")?
    };

    let mut pool = LocalPool::new();
    let spawner = pool.spawner();
    let handles = (0..options.consumers)
        .map(|id| {
            let consumer = buffer.iterate();
            spawner.spawn_local_with_handle(async move {
                let mut handled = 0_usize;
                while let Step::Yielded(line) = consumer.next().await {
                    println!("consumer-{id}\t{line}");
                    handled += 1;
                }
                (id, handled)
            })
        })
        .collect::<Result<Vec<_>, SpawnError>>()
        .context("无法派生消费者任务")?;

    let counts = pool.run_until(futures::future::join_all(handles));

    let produced = match producer.join() {
        Ok(result) => result?,
        Err(_) => bail!("读取线程 panic"),
    };

    for (id, handled) in counts {
        info!(consumer = id, handled, "consumer finished");
    }
    info!(produced, backlog = buffer.len(), "pipe drained");
    Ok(())
}

/// 生产线程以任何方式退出（EOF、读取错误或 panic）时关闭缓冲，唤醒所有消费者。
struct CloseOnExit(Buffer<String>);

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        self.0.end();
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Options> {
    let mut args = args.into_iter();
    let mut consumers = DEFAULT_CONSUMERS;
    let mut config_path: Option<PathBuf> = None;

    while let Some(flag) = args.next() {
        match flag.as_str() {
            "--consumers" => {
                let value = args.next().context("--consumers 之后必须提供数量")?;
                consumers = value
                    .parse()
                    .with_context(|| format!("无法解析消费者数量: {value}"))?;
                if consumers == 0 {
                    bail!("消费者数量必须大于 0");
                }
            }
            "--config" => {
                let value = args.next().context("--config 之后必须提供文件路径")?;
                config_path = Some(PathBuf::from(value));
            }
            unknown => bail!("未知参数: {unknown}"),
        }
    }

    let config = match config_path {
        Some(path) => {
            let source = fs::read_to_string(&path)
                .with_context(|| format!("读取配置失败: {}", path.display()))?;
            BufferConfig::from_toml_str(&source)
                .with_context(|| format!("解析配置失败: {}", path.display()))?
        }
        None => BufferConfig::default(),
    };

    Ok(Options { consumers, config })
}
