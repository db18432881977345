use std::collections::HashSet;
use std::io::Write;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{Level, warn};
use tracing_subscriber::FmtSubscriber;
use ts::{packet, sync};
use ts_fix::{CaptionTracer, Id3Converter, ServiceFilter};

mod cli;
mod error;
mod input;

use cli::CliArgs;
use error::AppError;
use input::Input;

const BUF_CAPACITY: usize = 65536;

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    let args = CliArgs::parse();

    // Logging goes to stderr; stdout carries the rewritten TS.
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::Initialization(e.to_string()))?;

    if args.timeout_mode == 2 {
        if args.timeout_sec == 0 {
            return Err(AppError::InvalidInput(
                "timeout must not be 0 in non-blocking mode".into(),
            ));
        }
        if args.seek != 0 {
            return Err(AppError::InvalidInput(
                "cannot seek the input in non-blocking mode".into(),
            ));
        }
    }

    run(args).await
}

async fn run(args: CliArgs) -> Result<(), AppError> {
    let trace_to_stdout = args.trace.as_deref() == Some("-");
    let trace_sink: Option<Box<dyn Write + Send>> = match args.trace.as_deref() {
        Some("-") => Some(Box::new(std::io::stdout())),
        Some(path) => match std::fs::File::create(path) {
            Ok(file) => Some(Box::new(file)),
            Err(e) => {
                warn!(path, error = %e, "cannot open trace file");
                None
            }
        },
        None => None,
    };

    let mut filter = ServiceFilter::new();
    filter.set_program_number_or_index(args.program_number_or_index);
    filter.set_audio1_mode(args.audio1_mode);
    filter.set_audio2_mode(args.audio2_mode);
    filter.set_caption_mode(args.caption_mode);
    filter.set_superimpose_mode(args.superimpose_mode);
    let mut tracer = CaptionTracer::new(trace_sink);
    let mut id3 = Id3Converter::new();
    id3.set_flags(args.id3_flags);
    let exclude_pids: HashSet<u16> = args.exclude_pids.iter().flatten().copied().collect();

    let mut timeout_mode = args.timeout_mode;
    let timeout_sec = args.timeout_sec as u64;
    let mut input = Input::open(&args.src).await?;
    let mut file_pos: i64 = 0;
    if args.seek != 0 {
        file_pos = input
            .seek_to(args.seek)
            .await
            .map_err(|e| AppError::InvalidInput(format!("seek failed: {e}")))?;
    }

    let mut stdout = std::io::stdout();
    let mut buf = vec![0u8; BUF_CAPACITY];
    let mut buf_count = 0usize;
    let mut unit_size = 0usize;
    // Start with a small read size; it adapts to the observed read rate.
    let mut buf_size = BUF_CAPACITY / 8;
    let mut measurement_read_count = 0u32;
    let mut last_write_time = Instant::now();
    let mut last_measurement_time = last_write_time;
    let mut limit_read_time = last_write_time + Duration::from_secs(1);
    let mut limit_read_file_pos = file_pos;

    loop {
        // In mode 1 reads stop one byte short of a unit boundary so the next
        // sync byte of a preallocated file is only consumed once it exists.
        let buf_max = if unit_size == 0 {
            buf_size
        } else {
            buf_size / unit_size * unit_size - if timeout_mode == 1 { unit_size - 1 } else { 0 }
        };
        let n = read_input(
            &mut input,
            &mut buf[buf_count..buf_max],
            timeout_mode == 2,
            timeout_sec,
            &last_write_time,
        )
        .await;

        let mut retry = false;
        let mut completed = false;
        let mut buf_pos: Option<usize> = None;
        match timeout_mode {
            0 => {
                // Synchronous, normal (may be appended) file/pipe
                match n {
                    Some(n) if n > 0 => {
                        buf_count += n;
                        file_pos += n as i64;
                    }
                    _ => retry = true,
                }
            }
            1 => {
                // Synchronous, may be preallocated file
                match n {
                    Some(n) if n > 0 => {
                        buf_count += n;
                        if buf_count == buf_max {
                            if unit_size == 0 {
                                let (pos, size) = sync::resync(&buf[..buf_count], unit_size);
                                unit_size = size;
                                if unit_size == 0 {
                                    retry = true;
                                    buf_count = 0;
                                } else {
                                    // Keep the sync byte at the buffer head
                                    file_pos += pos as i64 + 1;
                                    buf[0] = buf[pos];
                                    buf_count = 1;
                                    buf_pos = Some(0);
                                    if input.seek_to(file_pos).await.ok() != Some(file_pos) {
                                        warn!("seek failed");
                                        completed = true;
                                    }
                                }
                            } else {
                                let (pos, size) = sync::resync(&buf[..buf_count], unit_size);
                                unit_size = size;
                                if pos != 0 {
                                    retry = true;
                                    buf_count = 1;
                                } else {
                                    file_pos += buf_count as i64 - 1;
                                }
                                buf_pos = Some(0);
                            }
                        }
                    }
                    _ => {
                        // The preallocated region ended; behave like a
                        // growing file from here on.
                        file_pos += buf_count as i64 - if unit_size == 0 { 0 } else { 1 };
                        timeout_mode = 0;
                    }
                }
            }
            _ => {
                // Asynchronous, pipe
                match n {
                    Some(n) if n > 0 => {
                        buf_count += n;
                        file_pos += n as i64;
                    }
                    _ => completed = true,
                }
            }
        }

        if retry {
            if timeout_sec == 0 || last_write_time.elapsed().as_secs() >= timeout_sec {
                completed = true;
            } else {
                tokio::time::sleep(Duration::from_millis(200)).await;
                if input.seek_to(file_pos).await.ok() != Some(file_pos) {
                    warn!("seek failed");
                    completed = true;
                }
            }
        }

        if buf_count == buf_max || completed {
            let pos = match buf_pos {
                Some(pos) => pos,
                None => {
                    let (pos, size) = sync::resync(&buf[..buf_count], unit_size);
                    unit_size = size;
                    pos
                }
            };
            if unit_size != 0 {
                let mut i = pos;
                while i + unit_size <= buf_count {
                    let chunk: &[u8; 188] = buf[i..i + 188].try_into().unwrap();
                    if !exclude_pids.contains(&packet::pid(chunk)) {
                        filter.add_packet(chunk);
                    }
                    i += unit_size;
                }
            }
            for chunk in filter.packets().chunks_exact(188) {
                let chunk: &[u8; 188] = chunk.try_into().unwrap();
                tracer.add_packet(chunk);
                id3.add_packet(chunk);
            }
            filter.clear_packets();

            let now = Instant::now();
            measurement_read_count += 1;
            if measurement_read_count >= 500 {
                // Maximize buffer size
                buf_size = BUF_CAPACITY;
            }
            if now.duration_since(last_measurement_time).as_secs() >= 1 {
                // Decrease/Increase buffer size
                buf_size = if measurement_read_count < 10 {
                    buf_size.saturating_sub(BUF_CAPACITY / 8).max(BUF_CAPACITY / 8)
                } else {
                    (buf_size + BUF_CAPACITY / 8).min(BUF_CAPACITY)
                };
                measurement_read_count = 0;
                last_measurement_time = now;
            }
            if !id3.packets().is_empty() {
                if !trace_to_stdout {
                    if stdout.write_all(id3.packets()).is_err() {
                        completed = true;
                    }
                    let _ = stdout.flush();
                }
                id3.clear_packets();
                last_write_time = Instant::now();
            } else if timeout_sec != 0
                && now.duration_since(last_write_time).as_secs() >= timeout_sec
            {
                completed = true;
            }
            if completed {
                break;
            }
            if unit_size == 0 {
                buf_count = 0;
            } else {
                // Carry the partial unit to the buffer head
                if (pos != 0 || buf_count >= unit_size) && (buf_count - pos) % unit_size != 0 {
                    let carry_start = pos + (buf_count - pos) / unit_size * unit_size;
                    buf.copy_within(carry_start..buf_count, 0);
                }
                buf_count = (buf_count - pos) % unit_size;
            }
        }

        if args.limit_kbps != 0 {
            let limit_bytes_per_sec = args.limit_kbps as i64 * 1024;
            if file_pos - limit_read_file_pos > limit_bytes_per_sec {
                // Too fast
                let now = Instant::now();
                if limit_read_time > now {
                    tokio::time::sleep(limit_read_time - now).await;
                }
            }
            let now = Instant::now();
            if now >= limit_read_time {
                limit_read_time = now + Duration::from_secs(1);
                limit_read_file_pos = file_pos;
            }
        }
    }

    let _ = stdout.flush();
    Ok(())
}

/// One read from the input. In non-blocking mode the read is polled with a
/// one-second tick so the idle watchdog can cancel it; `None` means error
/// or cancellation.
async fn read_input(
    input: &mut Input,
    buf: &mut [u8],
    non_blocking: bool,
    timeout_sec: u64,
    last_write_time: &Instant,
) -> Option<usize> {
    if !non_blocking {
        return input.read(buf).await.ok();
    }
    loop {
        match tokio::time::timeout(Duration::from_secs(1), input.read(buf)).await {
            Ok(result) => return result.ok(),
            Err(_) => {
                if last_write_time.elapsed().as_secs() >= timeout_sec {
                    return None;
                }
            }
        }
    }
}
