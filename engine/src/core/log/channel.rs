use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};

#[derive(Debug, Clone)]
pub struct LogMessage {
    pub level: Level,
    pub target: String,
    pub message: String,
}

/// A `log` backend that forwards records over a crossbeam channel so the host process decides
/// where they end up. Map worker threads never block on it.
pub struct ChannelLogger {
    sender: Sender<LogMessage>,
    level: LevelFilter,
}

impl log::Log for ChannelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let _ = self.sender.try_send(LogMessage {
                level: record.metadata().level(),
                target: record.target().to_string(),
                message: format!("{}", record.args()),
            });
        }
    }

    fn flush(&self) {}
}

impl ChannelLogger {
    pub fn new(sender: Sender<LogMessage>, level: LevelFilter) -> Self {
        Self { sender, level }
    }

    pub fn with_receiver(level: LevelFilter) -> (Self, Receiver<LogMessage>) {
        let (sender, receiver) = unbounded();
        (Self::new(sender, level), receiver)
    }

    /// Installs a channel logger as the global `log` backend and hands back the receiving end.
    pub fn install(level: LevelFilter) -> Result<Receiver<LogMessage>, SetLoggerError> {
        let (logger, receiver) = Self::with_receiver(level);
        log::set_boxed_logger(Box::new(logger))?;
        log::set_max_level(level);
        Ok(receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Log;

    #[test]
    fn forwards_enabled_records() {
        // Given
        let (logger, receiver) = ChannelLogger::with_receiver(LevelFilter::Info);

        // When
        logger.log(
            &Record::builder()
                .level(Level::Warn)
                .target("world::map")
                .args(format_args!("grid {} refused unload", 7))
                .build(),
        );

        // Then
        let message = receiver.try_recv().unwrap();
        assert_eq!(message.level, Level::Warn);
        assert_eq!(message.target, "world::map");
        assert_eq!(message.message, "grid 7 refused unload");
    }

    #[test]
    fn filters_below_level() {
        // Given
        let (logger, receiver) = ChannelLogger::with_receiver(LevelFilter::Info);

        // When
        logger.log(
            &Record::builder()
                .level(Level::Trace)
                .args(format_args!("tick"))
                .build(),
        );

        // Then
        assert!(receiver.try_recv().is_err());
    }
}
