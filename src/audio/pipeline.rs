//! Construcción del pipeline resolver → transcoder.
//!
//! `yt-dlp` elige el mejor audio disponible y `ffmpeg` lo deja en un formato que
//! la salida de voz acepta sin más conversiones: PCM f32 a 48 kHz estéreo, o
//! Ogg/Opus por copia directa cuando el origen ya es Opus. En modo `direct` el
//! codec lo informa yt-dlp; en modo `piped` se deduce de la cabecera del
//! contenedor (Ogg o WebM) antes de lanzar ffmpeg.
//!
//! Los procesos pertenecen al [`AudioPipeline`]; al cerrarlo o soltarlo se matan y
//! se recogen los dos. Nada se escribe a disco.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    fmt,
    process::Stdio,
    str::FromStr,
    sync::Arc,
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, ChildStderr, ChildStdin, ChildStdout, Command},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineStage};

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: u32 = 2;

const LOCATOR: &str = "{locator}";
const INPUT: &str = "{input}";
const MAX_DIAGNOSTIC_LINES: usize = 20;
const EXIT_GRACE: Duration = Duration::from_secs(2);
/// Bytes del resolver que se miran para reconocer el contenedor
const SNIFF_LEN: usize = 4096;
/// Espera máxima por más cabecera una vez llegaron los primeros bytes
const SNIFF_SETTLE: Duration = Duration::from_millis(200);
const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

/// Formato de los bytes que entrega el transcoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    /// f32 little-endian intercalado
    Pcm { sample_rate: u32, channels: u32 },
    /// Opus en contenedor Ogg, copiado sin recodificar
    OggOpus,
}

/// Flujo de audio vivo listo para el sink
pub struct AudioStream {
    reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
    format: StreamFormat,
}

impl AudioStream {
    pub fn new(reader: impl AsyncRead + Send + Sync + Unpin + 'static, format: StreamFormat) -> Self {
        Self {
            reader: Box::new(reader),
            format,
        }
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn into_reader(self) -> Box<dyn AsyncRead + Send + Sync + Unpin> {
        self.reader
    }
}

impl fmt::Debug for AudioStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioStream").field("format", &self.format).finish()
    }
}

/// Cómo se encadenan resolver y transcoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    /// stdout de yt-dlp conectado al stdin de ffmpeg
    Piped,
    /// yt-dlp sólo imprime codec y URL; ffmpeg abre la URL
    Direct,
}

impl FromStr for PipelineMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "piped" | "pipe" => Ok(PipelineMode::Piped),
            "direct" | "url" => Ok(PipelineMode::Direct),
            other => anyhow::bail!("Modo de pipeline desconocido: {}", other),
        }
    }
}

/// Programa y argumentos; `{locator}` y `{input}` se sustituyen al lanzar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    fn command(&self, placeholder: &str, value: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args.iter().map(|arg| arg.replace(placeholder, value)))
            .kill_on_drop(true);
        cmd
    }
}

/// Juego completo de comandos externos del pipeline
#[derive(Debug, Clone)]
pub struct PipelineCommands {
    pub resolver: CommandSpec,
    pub transcoder_pcm: CommandSpec,
    pub transcoder_copy: CommandSpec,
}

impl PipelineCommands {
    pub fn new(resolver_bin: &str, transcoder_bin: &str, mode: PipelineMode) -> Self {
        let resolver = match mode {
            PipelineMode::Piped => CommandSpec::new(
                resolver_bin,
                ["-f", "bestaudio", "-o", "-", "--no-playlist", "--no-warnings", "-q", LOCATOR],
            ),
            PipelineMode::Direct => CommandSpec::new(
                resolver_bin,
                [
                    "-f", "bestaudio", "--no-playlist", "--no-warnings", "-q",
                    "--print", "%(acodec)s", "--print", "%(url)s", LOCATOR,
                ],
            ),
        };

        let mut input_args: Vec<&str> = vec!["-hide_banner", "-loglevel", "warning"];
        if mode == PipelineMode::Direct {
            input_args.extend(["-reconnect", "1", "-reconnect_streamed", "1", "-reconnect_delay_max", "5"]);
        }

        let sample_rate = SAMPLE_RATE.to_string();
        let channels = CHANNELS.to_string();
        let mut pcm = input_args.clone();
        pcm.extend([
            "-i", INPUT, "-vn",
            "-f", "f32le", "-ar", sample_rate.as_str(), "-ac", channels.as_str(), "pipe:1",
        ]);

        let mut copy = input_args;
        copy.extend(["-i", INPUT, "-vn", "-c:a", "copy", "-f", "ogg", "pipe:1"]);

        Self {
            resolver,
            transcoder_pcm: CommandSpec::new(transcoder_bin, pcm),
            transcoder_copy: CommandSpec::new(transcoder_bin, copy),
        }
    }
}

/// Construye un flujo de audio vivo a partir de un locator
#[async_trait]
pub trait PipelineBuilder: Send + Sync {
    async fn build(&self, locator: &str) -> Result<(AudioPipeline, AudioStream), PipelineError>;
}

/// Últimas líneas de stderr de un proceso, también enviadas al log
#[derive(Debug, Clone, Default)]
struct DiagnosticLog {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl DiagnosticLog {
    fn capture(tool: String, stderr: Option<ChildStderr>) -> (Self, Option<JoinHandle<()>>) {
        let log = Self::default();
        let Some(stderr) = stderr else {
            return (log, None);
        };

        let sink = log.clone();
        let task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                // progreso de ffmpeg
                if line.is_empty() || line.contains("size=") {
                    continue;
                }
                debug!("[{}] {}", tool, line);
                sink.push(line.to_string());
            }
        });

        (log, Some(task))
    }

    fn push(&self, line: String) {
        let mut lines = self.lines.lock();
        if lines.len() == MAX_DIAGNOSTIC_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    fn text(&self) -> String {
        self.lines.lock().iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

/// Un proceso del pipeline con su stderr capturado
#[derive(Debug)]
struct Stage {
    stage: PipelineStage,
    child: Child,
    log: DiagnosticLog,
    log_task: Option<JoinHandle<()>>,
}

impl Stage {
    fn spawn(stage: PipelineStage, mut cmd: Command, stdin: Stdio) -> Result<Self, PipelineError> {
        let program = cmd.as_std().get_program().to_string_lossy().into_owned();
        let mut child = cmd
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PipelineError::new(stage, None, format!("could not start {program}: {e}")))?;

        let (log, log_task) = DiagnosticLog::capture(program, child.stderr.take());
        Ok(Self {
            stage,
            child,
            log,
            log_task,
        })
    }

    /// Espera un poco la salida del proceso y arma el error con su stderr
    async fn failure(&mut self, fallback: &str) -> PipelineError {
        let status = tokio::time::timeout(EXIT_GRACE, self.child.wait()).await.ok().and_then(Result::ok);
        if let Some(task) = self.log_task.take() {
            let _ = tokio::time::timeout(EXIT_GRACE, task).await;
        }

        let diagnostic = match self.log.text() {
            text if text.is_empty() => fallback.to_string(),
            text => text,
        };
        PipelineError::new(self.stage, status.and_then(|s| s.code()), diagnostic)
    }

    /// Ya terminó con código distinto de cero
    fn has_failed(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(status)) if !status.success())
    }

    fn terminate(mut self) {
        if let Err(e) = self.child.start_kill() {
            // InvalidInput: ya había terminado
            if e.kind() != std::io::ErrorKind::InvalidInput {
                warn!("⚠️ No se pudo matar el {}: {}", self.stage, e);
            }
        }
        if let Some(task) = self.log_task.take() {
            task.abort();
        }
        let stage = self.stage;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = self.child.wait().await;
                    debug!("🧹 Proceso {} recogido", stage);
                });
            }
            // sin runtime: kill_on_drop y el reaper de tokio se encargan
            Err(_) => drop(self),
        }
    }
}

/// Procesos vivos de una pista. Se matan al cerrar o al soltar el valor.
#[derive(Debug, Default)]
pub struct AudioPipeline {
    resolver: Option<Stage>,
    transcoder: Option<Stage>,
    /// Copia resolver → transcoder en modo `piped`
    feeder: Option<JoinHandle<()>>,
}

impl AudioPipeline {
    /// Pipeline sin procesos, para salidas que no dependen de herramientas externas
    pub fn detached() -> Self {
        Self::default()
    }

    /// PIDs de los procesos que siguen bajo control del pipeline
    pub fn pids(&self) -> Vec<u32> {
        [&self.resolver, &self.transcoder]
            .into_iter()
            .flatten()
            .filter_map(|stage| stage.child.id())
            .collect()
    }

    /// Mata ambos procesos y los recoge en segundo plano
    pub fn close(mut self) {
        self.terminate();
    }

    fn terminate(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
        for stage in [self.resolver.take(), self.transcoder.take()].into_iter().flatten() {
            stage.terminate();
        }
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Ogg con `OpusHead` o Matroska/WebM con pista `A_OPUS`
fn is_opus_header(header: &[u8]) -> bool {
    let contains = |needle: &[u8]| header.windows(needle.len()).any(|w| w == needle);
    (header.starts_with(b"OggS") && contains(b"OpusHead")) || (header.starts_with(&EBML_MAGIC) && contains(b"A_OPUS"))
}

/// Reenvía al transcoder la cabecera ya leída y el resto de la salida del resolver
async fn feed(header: Vec<u8>, mut from: ChildStdout, mut to: ChildStdin) {
    use tokio::io::AsyncWriteExt;

    let result: std::io::Result<()> = async {
        to.write_all(&header).await?;
        tokio::io::copy(&mut from, &mut to).await?;
        to.shutdown().await
    }
    .await;

    if let Err(e) = result {
        // BrokenPipe: el transcoder ya cerró su entrada
        debug!("Copia resolver → transcoder cortada: {}", e);
    }
}

/// Salida del resolver en modo `direct`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectSource {
    pub codec: Option<String>,
    pub url: String,
}

impl DirectSource {
    pub fn parse(stdout: &str) -> Option<Self> {
        let lines: Vec<&str> = stdout.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        let url = lines.iter().find(|l| l.starts_with("http://") || l.starts_with("https://"))?;
        let codec = lines
            .iter()
            .find(|l| !l.starts_with("http://") && !l.starts_with("https://"))
            .filter(|c| **c != "none" && **c != "NA")
            .map(|c| c.to_string());

        Some(Self {
            codec,
            url: url.to_string(),
        })
    }

    /// Opus se puede copiar tal cual; el resto se decodifica a PCM
    pub fn is_opus(&self) -> bool {
        self.codec.as_deref().is_some_and(|c| c.starts_with("opus"))
    }
}

/// Builder real basado en subprocesos
#[derive(Debug, Clone)]
pub struct ProcessPipelineBuilder {
    commands: PipelineCommands,
    mode: PipelineMode,
    startup_timeout: Duration,
}

impl ProcessPipelineBuilder {
    pub fn new(commands: PipelineCommands, mode: PipelineMode, startup_timeout: Duration) -> Self {
        Self {
            commands,
            mode,
            startup_timeout,
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(
            PipelineCommands::new(&config.resolver_bin, &config.transcoder_bin, config.pipeline_mode),
            config.pipeline_mode,
            config.pipeline_startup_timeout,
        )
    }

    async fn build_piped(&self, locator: &str) -> Result<(AudioPipeline, AudioStream), PipelineError> {
        let deadline = Instant::now() + self.startup_timeout;

        let mut resolver = Stage::spawn(
            PipelineStage::Resolver,
            self.commands.resolver.command(LOCATOR, locator),
            Stdio::null(),
        )?;
        let Some(mut resolver_out) = resolver.child.stdout.take() else {
            resolver.terminate();
            return Err(PipelineError::new(PipelineStage::Resolver, None, "stdout not captured"));
        };

        let header = match self.read_header(&mut resolver_out, deadline).await {
            Ok(header) if !header.is_empty() => header,
            Ok(_) => return Err(resolver.failure("resolver exited without output").await),
            Err(e) => {
                resolver.terminate();
                return Err(e);
            }
        };

        // desde aquí soltar `pipeline` mata al resolver
        let mut pipeline = AudioPipeline {
            resolver: Some(resolver),
            transcoder: None,
            feeder: None,
        };

        let (spec, format) = self.transcoder_for(is_opus_header(&header));
        let mut transcoder = Stage::spawn(PipelineStage::Transcoder, spec.command(INPUT, "pipe:0"), Stdio::piped())?;
        let stdin = transcoder.child.stdin.take();
        pipeline.transcoder = Some(transcoder);

        let stdin = stdin.ok_or_else(|| PipelineError::new(PipelineStage::Transcoder, None, "stdin not captured"))?;
        pipeline.feeder = Some(tokio::spawn(feed(header, resolver_out, stdin)));
        self.await_first_bytes(pipeline, format, deadline).await
    }

    /// Primeros bytes del resolver, suficientes para reconocer el contenedor
    async fn read_header(&self, reader: &mut ChildStdout, deadline: Instant) -> Result<Vec<u8>, PipelineError> {
        use tokio::io::AsyncReadExt;

        let mut header = Vec::with_capacity(SNIFF_LEN);
        let mut chunk = vec![0u8; SNIFF_LEN];

        while header.len() < SNIFF_LEN && !is_opus_header(&header) {
            let limit = if header.is_empty() {
                deadline
            } else {
                deadline.min(Instant::now() + SNIFF_SETTLE)
            };
            let want = SNIFF_LEN - header.len();

            match tokio::time::timeout_at(limit, reader.read(&mut chunk[..want])).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => header.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(PipelineError::new(PipelineStage::Resolver, None, e.to_string())),
                Err(_) if header.is_empty() => {
                    return Err(PipelineError::new(
                        PipelineStage::Resolver,
                        None,
                        format!("no audio within {:?}", self.startup_timeout),
                    ));
                }
                Err(_) => break,
            }
        }

        Ok(header)
    }

    /// Copia sin recodificar para Opus, PCM para todo lo demás
    fn transcoder_for(&self, opus: bool) -> (&CommandSpec, StreamFormat) {
        if opus {
            info!("📦 Origen Opus, copiando sin recodificar");
            (&self.commands.transcoder_copy, StreamFormat::OggOpus)
        } else {
            let format = StreamFormat::Pcm {
                sample_rate: SAMPLE_RATE,
                channels: CHANNELS,
            };
            (&self.commands.transcoder_pcm, format)
        }
    }

    async fn build_direct(&self, locator: &str) -> Result<(AudioPipeline, AudioStream), PipelineError> {
        let mut resolver = Stage::spawn(
            PipelineStage::Resolver,
            self.commands.resolver.command(LOCATOR, locator),
            Stdio::null(),
        )?;
        let mut stdout = resolver
            .child
            .stdout
            .take()
            .ok_or_else(|| PipelineError::new(PipelineStage::Resolver, None, "stdout not captured"))?;

        let mut output = String::new();
        let read = tokio::time::timeout(self.startup_timeout, async {
            use tokio::io::AsyncReadExt;
            stdout.read_to_string(&mut output).await?;
            resolver.child.wait().await
        })
        .await;

        let status = match read {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                let err = PipelineError::new(PipelineStage::Resolver, None, e.to_string());
                resolver.terminate();
                return Err(err);
            }
            Err(_) => {
                resolver.terminate();
                return Err(PipelineError::new(
                    PipelineStage::Resolver,
                    None,
                    format!("no stream URL within {:?}", self.startup_timeout),
                ));
            }
        };

        if !status.success() {
            return Err(resolver.failure("resolver exited without output").await);
        }

        let source = DirectSource::parse(&output).ok_or_else(|| {
            PipelineError::new(PipelineStage::Resolver, status.code(), "no stream URL in resolver output")
        })?;
        resolver.terminate();

        let (spec, format) = self.transcoder_for(source.is_opus());
        let transcoder = Stage::spawn(PipelineStage::Transcoder, spec.command(INPUT, &source.url), Stdio::null())?;
        let pipeline = AudioPipeline {
            resolver: None,
            transcoder: Some(transcoder),
            feeder: None,
        };
        self.await_first_bytes(pipeline, format, Instant::now() + self.startup_timeout)
            .await
    }

    /// Espera los primeros bytes del transcoder o el fallo de alguna etapa
    async fn await_first_bytes(
        &self,
        mut pipeline: AudioPipeline,
        format: StreamFormat,
        deadline: Instant,
    ) -> Result<(AudioPipeline, AudioStream), PipelineError> {
        let stdout = pipeline
            .transcoder
            .as_mut()
            .and_then(|stage| stage.child.stdout.take())
            .ok_or_else(|| PipelineError::new(PipelineStage::Transcoder, None, "stdout not captured"))?;
        let mut reader = BufReader::new(stdout);

        let deadline = tokio::time::sleep_until(deadline);
        tokio::pin!(deadline);

        let outcome: Result<(), PipelineError> = loop {
            if let Some(resolver) = pipeline.resolver.as_mut() {
                if resolver.has_failed() {
                    break Err(resolver.failure("resolver exited with an error").await);
                }
            }

            tokio::select! {
                read = reader.fill_buf() => {
                    break match read {
                        Ok(buf) if !buf.is_empty() => Ok(()),
                        Ok(_) => Err(self.classify_silent_exit(&mut pipeline).await),
                        Err(e) => Err(PipelineError::new(PipelineStage::Transcoder, None, e.to_string())),
                    };
                }
                _ = tokio::time::sleep(Duration::from_millis(100)), if pipeline.resolver.is_some() => {
                    // revisar el resolver en la próxima vuelta
                }
                _ = &mut deadline => {
                    let stage = if pipeline.resolver.as_mut().is_some_and(|s| matches!(s.child.try_wait(), Ok(None))) {
                        PipelineStage::Resolver
                    } else {
                        PipelineStage::Transcoder
                    };
                    break Err(PipelineError::new(
                        stage,
                        None,
                        format!("no audio within {:?}", self.startup_timeout),
                    ));
                }
            }
        };

        match outcome {
            Ok(()) => {
                debug!("🎚️ Primeros bytes recibidos ({:?})", format);
                Ok((pipeline, AudioStream::new(reader, format)))
            }
            Err(e) => {
                pipeline.close();
                Err(e)
            }
        }
    }

    /// El transcoder cerró stdout sin audio: culpar al resolver si falló
    async fn classify_silent_exit(&self, pipeline: &mut AudioPipeline) -> PipelineError {
        if let Some(resolver) = pipeline.resolver.as_mut() {
            let status = tokio::time::timeout(EXIT_GRACE, resolver.child.wait()).await;
            if matches!(status, Ok(Ok(s)) if !s.success()) {
                return resolver.failure("resolver exited with an error").await;
            }
        }

        match pipeline.transcoder.as_mut() {
            Some(transcoder) => transcoder.failure("transcoder produced no audio").await,
            None => PipelineError::new(PipelineStage::Transcoder, None, "transcoder produced no audio"),
        }
    }
}

#[async_trait]
impl PipelineBuilder for ProcessPipelineBuilder {
    async fn build(&self, locator: &str) -> Result<(AudioPipeline, AudioStream), PipelineError> {
        info!("🔧 Construyendo pipeline ({:?}) para: {}", self.mode, locator);
        match self.mode {
            PipelineMode::Piped => self.build_piped(locator).await,
            PipelineMode::Direct => self.build_direct(locator).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_commands_target_48k_stereo() {
        let commands = PipelineCommands::new("yt-dlp", "ffmpeg", PipelineMode::Piped);
        assert_eq!(commands.resolver.program, "yt-dlp");
        assert!(commands.resolver.args.contains(&"bestaudio".to_string()));
        assert_eq!(commands.resolver.args.last().map(String::as_str), Some(LOCATOR));

        let pcm = commands.transcoder_pcm.args.join(" ");
        assert!(pcm.contains("-i {input}"));
        assert!(pcm.contains("-f f32le -ar 48000 -ac 2 pipe:1"));

        let copy = commands.transcoder_copy.args.join(" ");
        assert!(copy.contains("-c:a copy -f ogg"));
    }

    #[test]
    fn direct_mode_prints_codec_and_url() {
        let commands = PipelineCommands::new("yt-dlp", "ffmpeg", PipelineMode::Direct);
        let args = commands.resolver.args.join(" ");
        assert!(args.contains("--print %(acodec)s --print %(url)s"));
        assert!(!args.contains("-o -"));
        assert!(commands.transcoder_pcm.args.contains(&"-reconnect".to_string()));
    }

    #[test]
    fn parse_direct_output() {
        let source = DirectSource::parse("opus\nhttps://rr1.googlevideo.com/videoplayback?id=1\n").unwrap();
        assert_eq!(source.codec.as_deref(), Some("opus"));
        assert!(source.is_opus());

        let source = DirectSource::parse("https://cdn.example.com/a.m4a\nmp4a.40.2").unwrap();
        assert_eq!(source.url, "https://cdn.example.com/a.m4a");
        assert!(!source.is_opus());

        assert_eq!(DirectSource::parse("ERROR\n"), None);
    }

    #[test]
    fn mode_parses_from_env_values() {
        assert_eq!("piped".parse::<PipelineMode>().unwrap(), PipelineMode::Piped);
        assert_eq!(" DIRECT ".parse::<PipelineMode>().unwrap(), PipelineMode::Direct);
        assert!("lavalink".parse::<PipelineMode>().is_err());
    }

    #[cfg(unix)]
    fn shell_builder(resolver_script: &str, startup_timeout: Duration) -> ProcessPipelineBuilder {
        let commands = PipelineCommands {
            resolver: CommandSpec::new("sh", ["-c", resolver_script]),
            transcoder_pcm: CommandSpec::new("cat", Vec::<String>::new()),
            transcoder_copy: CommandSpec::new("cat", Vec::<String>::new()),
        };
        ProcessPipelineBuilder::new(commands, PipelineMode::Piped, startup_timeout)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn piped_stream_carries_resolver_bytes() {
        use tokio::io::AsyncReadExt;

        let builder = shell_builder("printf 'abc'", Duration::from_secs(5));
        let (pipeline, stream) = builder.build("https://youtu.be/x").await.unwrap();
        assert_eq!(
            stream.format(),
            StreamFormat::Pcm {
                sample_rate: 48_000,
                channels: 2
            }
        );

        let mut bytes = Vec::new();
        stream.into_reader().read_to_end(&mut bytes).await.unwrap();
        assert_eq!(bytes, b"abc");
        pipeline.close();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resolver_failure_reports_exit_code_and_stderr() {
        let builder = shell_builder("echo 'ERROR: Video unavailable' >&2; exit 3", Duration::from_secs(5));
        let err = builder.build("https://youtu.be/gone").await.unwrap_err();

        assert_eq!(err.stage, PipelineStage::Resolver);
        assert_eq!(err.exit_code, Some(3));
        assert!(err.diagnostic.contains("Video unavailable"), "{}", err.diagnostic);
    }

    #[test]
    fn opus_containers_are_recognised() {
        assert!(is_opus_header(b"OggS\0\x02\0\0OpusHead\x01\x02"));
        assert!(!is_opus_header(b"OggS\0\x02\0\0\x7fFLAC"));

        let mut webm = EBML_MAGIC.to_vec();
        webm.extend_from_slice(b"\x9fwebm\x86\x86A_OPUS");
        assert!(is_opus_header(&webm));

        let mut aac = EBML_MAGIC.to_vec();
        aac.extend_from_slice(b"\x86A_AAC");
        assert!(!is_opus_header(&aac));
        assert!(!is_opus_header(b"ID3\x04 A_OPUS"));
        assert!(!is_opus_header(b""));
    }

    /// Transcoders que anteponen una marca a lo que reciben por stdin
    #[cfg(unix)]
    fn tagging_builder(resolver_script: &str, mode: PipelineMode) -> ProcessPipelineBuilder {
        let commands = PipelineCommands {
            resolver: CommandSpec::new("sh", ["-c", resolver_script]),
            transcoder_pcm: CommandSpec::new("sh", ["-c", "printf pcm:; cat", INPUT]),
            transcoder_copy: CommandSpec::new("sh", ["-c", "printf copy:; cat", INPUT]),
        };
        ProcessPipelineBuilder::new(commands, mode, Duration::from_secs(5))
    }

    #[cfg(unix)]
    async fn build_output(builder: &ProcessPipelineBuilder) -> (StreamFormat, String) {
        use tokio::io::AsyncReadExt;

        let (pipeline, stream) = builder.build("https://youtu.be/x").await.unwrap();
        let format = stream.format();
        let mut bytes = Vec::new();
        stream.into_reader().read_to_end(&mut bytes).await.unwrap();
        pipeline.close();
        (format, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn each_mode_picks_copy_for_opus_and_pcm_otherwise() {
        let pcm = StreamFormat::Pcm {
            sample_rate: 48_000,
            channels: 2,
        };

        let piped_opus = tagging_builder("printf 'OggS-OpusHead-data'", PipelineMode::Piped);
        assert_eq!(
            build_output(&piped_opus).await,
            (StreamFormat::OggOpus, "copy:OggS-OpusHead-data".to_string())
        );

        let piped_other = tagging_builder("printf 'ID3-mp3-data'", PipelineMode::Piped);
        assert_eq!(build_output(&piped_other).await, (pcm, "pcm:ID3-mp3-data".to_string()));

        let direct_opus = tagging_builder("printf 'opus\\nhttps://cdn.test/a.webm\\n'", PipelineMode::Direct);
        assert_eq!(build_output(&direct_opus).await, (StreamFormat::OggOpus, "copy:".to_string()));

        let direct_other = tagging_builder("printf 'mp4a.40.2\\nhttps://cdn.test/a.m4a\\n'", PipelineMode::Direct);
        assert_eq!(build_output(&direct_other).await, (pcm, "pcm:".to_string()));
    }

    #[tokio::test]
    async fn missing_binary_fails_at_spawn() {
        let commands = PipelineCommands::new("definitely-not-a-resolver", "ffmpeg", PipelineMode::Piped);
        let builder = ProcessPipelineBuilder::new(commands, PipelineMode::Piped, Duration::from_secs(1));

        let err = builder.build("https://youtu.be/x").await.unwrap_err();
        assert_eq!(err.stage, PipelineStage::Resolver);
        assert_eq!(err.exit_code, None);
        assert!(err.diagnostic.contains("could not start"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_pipeline_times_out() {
        let builder = shell_builder("sleep 5", Duration::from_millis(300));
        let err = builder.build("https://youtu.be/slow").await.unwrap_err();

        assert_eq!(err.stage, PipelineStage::Resolver);
        assert!(err.diagnostic.contains("no audio within"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn close_kills_both_processes() {
        let builder = shell_builder("printf 'abc'; sleep 30", Duration::from_secs(5));
        let (pipeline, _stream) = builder.build("https://youtu.be/x").await.unwrap();

        let pids = pipeline.pids();
        assert_eq!(pids.len(), 2);
        pipeline.close();

        let alive = |pid: &u32| std::path::Path::new(&format!("/proc/{pid}")).exists();
        for _ in 0..50 {
            if !pids.iter().any(alive) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("pipeline processes still alive: {:?}", pids);
    }
}
