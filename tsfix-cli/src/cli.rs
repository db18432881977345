use clap::Parser;

/// Define CLI arguments
#[derive(Parser)]
#[command(
    version,
    about = "Broadcast TS rewriter for web players",
    long_about = "Reads an MPEG-2 transport stream, selects one service and re-emits it\n\
                  on a fixed PID layout with rewritten PAT/PMT, optionally transmuxing\n\
                  ARIB dual-mono/mono AAC, synthesizing silent audio, converting ARIB\n\
                  captions to ID3 timed metadata and tracing decoded captions.\n\
                  The rewritten stream goes to stdout."
)]
pub struct CliArgs {
    /// Accepted for compatibility, ignored
    #[arg(short = 'z', hide = true, value_name = "IGNORED")]
    pub ignored: Option<String>,

    /// Start byte offset; negative counts from the end of the file
    #[arg(short = 's', long = "seek", default_value_t = 0, allow_hyphen_values = true)]
    pub seek: i64,

    /// Read rate limit in KB/s (0 disables)
    #[arg(short = 'l', long = "limit", default_value_t = 0, value_parser = clap::value_parser!(u32).range(0..=32 * 1024))]
    pub limit_kbps: u32,

    /// Exit when no output has been produced for this many seconds (0 disables)
    #[arg(short = 't', long = "timeout", default_value_t = 0, value_parser = clap::value_parser!(u32).range(0..=600))]
    pub timeout_sec: u32,

    /// Input mode: 0 streaming file/pipe, 1 preallocated file with reseek
    /// on EOF, 2 non-blocking pipe
    #[arg(short = 'm', long = "mode", default_value_t = 0, value_parser = clap::value_parser!(u32).range(0..=2))]
    pub timeout_mode: u32,

    /// Slash-separated list of PIDs to drop before filtering (e.g. 100/200)
    #[arg(short = 'x', long = "exclude", value_parser = parse_pid_list)]
    pub exclude_pids: Option<Vec<u16>>,

    /// Program selector: positive program_number, negative 1-based index,
    /// 0 passes everything through
    #[arg(short = 'n', long = "program", default_value_t = 0, value_parser = clap::value_parser!(i32).range(-256..=65535), allow_hyphen_values = true)]
    pub program_number_or_index: i32,

    /// Audio1 mode: low 2 bits 0 passthrough / 1 synthesize silence,
    /// bit 2 mono-to-stereo, bit 3 dual-mono split
    #[arg(short = 'a', long = "audio1", default_value_t = 0, value_parser = parse_audio1_mode)]
    pub audio1_mode: u32,

    /// Audio2 mode: low 2 bits 0 passthrough / 1 synthesize silence /
    /// 2 drop / 3 mirror audio1, bit 2 mono-to-stereo
    #[arg(short = 'b', long = "audio2", default_value_t = 0, value_parser = clap::value_parser!(u32).range(0..=7))]
    pub audio2_mode: u32,

    /// Caption mode: 0 passthrough, 1 synthesize an empty PMT entry, 2 drop
    #[arg(short = 'c', long = "caption", default_value_t = 0, value_parser = parse_data_mode)]
    pub caption_mode: u32,

    /// Superimpose mode: 0 passthrough, 1 synthesize an empty PMT entry, 2 drop
    #[arg(short = 'u', long = "superimpose", default_value_t = 0, value_parser = parse_data_mode)]
    pub superimpose_mode: u32,

    /// Caption trace output file; "-" traces to stdout and suppresses the
    /// TS output
    #[arg(short = 'r', long = "trace")]
    pub trace: Option<String>,

    /// ID3 conversion flags: bit 0 enable, bit 1 treat unknown private
    /// data as superimpose, bit 2 insert five workaround bytes,
    /// bit 3 force monotonous PTS
    #[arg(short = 'd', long = "id3", default_value_t = 0, value_parser = clap::value_parser!(u32).range(0..=15))]
    pub id3_flags: u32,

    /// Enable detailed debug logging on stderr
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Input TS file, or "-" for stdin
    #[arg(value_name = "src")]
    pub src: String,
}

fn parse_pid_list(value: &str) -> Result<Vec<u16>, String> {
    value
        .split('/')
        .map(|part| {
            let pid: u16 = part
                .parse()
                .map_err(|_| format!("invalid PID '{part}'"))?;
            if pid > 8191 {
                return Err(format!("PID {pid} out of range"));
            }
            Ok(pid)
        })
        .collect()
}

fn parse_audio1_mode(value: &str) -> Result<u32, String> {
    let mode: u32 = value.parse().map_err(|_| "not a number".to_string())?;
    if mode > 13 || mode % 4 > 1 {
        return Err("audio1 mode must be 0/1 plus optional bits 4 and 8".to_string());
    }
    Ok(mode)
}

fn parse_data_mode(value: &str) -> Result<u32, String> {
    let mode: u32 = value.parse().map_err(|_| "not a number".to_string())?;
    if mode > 2 {
        return Err("mode must be 0, 1 or 2".to_string());
    }
    Ok(mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pid_list() {
        assert_eq!(parse_pid_list("100/200/8191").unwrap(), vec![100, 200, 8191]);
        assert!(parse_pid_list("100/x").is_err());
        assert!(parse_pid_list("9000").is_err());
    }

    #[test]
    fn test_audio1_mode_validation() {
        for mode in [0, 1, 4, 5, 8, 9, 12, 13] {
            assert_eq!(parse_audio1_mode(&mode.to_string()).unwrap(), mode);
        }
        for mode in [2, 3, 6, 14] {
            assert!(parse_audio1_mode(&mode.to_string()).is_err());
        }
    }

    #[test]
    fn test_args_parse() {
        let args =
            CliArgs::parse_from(["tsfix", "-n", "-1", "-a", "13", "-d", "9", "-r", "-", "-"]);
        assert_eq!(args.program_number_or_index, -1);
        assert_eq!(args.audio1_mode, 13);
        assert_eq!(args.id3_flags, 9);
        assert_eq!(args.trace.as_deref(), Some("-"));
        assert_eq!(args.src, "-");
    }
}
