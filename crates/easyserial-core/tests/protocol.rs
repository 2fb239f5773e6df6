use easyserial_core::protocol::{
    Checksum, CommunicationChannel, Connector, EofPolicy, ExchangeConfig, ExchangeError,
    Exchanger, ProtocolError, RetryBudget, TransportConfig, TransportEndpoint,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What the mock device does on each read
#[derive(Clone, Debug)]
enum Step {
    Data(Vec<u8>),
    /// Send back whatever was written on this channel
    Echo,
    Eof,
    Fail(io::ErrorKind),
}

#[derive(Default)]
struct Counters {
    opens: AtomicUsize,
    closes: AtomicUsize,
    reads: AtomicUsize,
    writes: Mutex<Vec<Vec<u8>>>,
    endpoints: Mutex<Vec<TransportEndpoint>>,
}

/// Mock serial device: one scripted conversation per open
struct MockConnector {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    counters: Arc<Counters>,
    fail_open: bool,
    fail_write: bool,
}

impl MockConnector {
    fn new(scripts: Vec<Vec<Step>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            counters: Arc::new(Counters::default()),
            fail_open: false,
            fail_write: false,
        }
    }
}

impl Connector for MockConnector {
    fn open(
        &self,
        endpoint: &TransportEndpoint,
    ) -> Result<Box<dyn CommunicationChannel>, ProtocolError> {
        self.counters.endpoints.lock().push(endpoint.clone());
        if self.fail_open {
            return Err(ProtocolError::Open {
                endpoint: endpoint.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such device"),
            });
        }
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        let steps = self.scripts.lock().pop_front().unwrap_or_else(|| vec![Step::Eof]);
        Ok(Box::new(MockChannel {
            steps: steps.into(),
            written: Vec::new(),
            counters: self.counters.clone(),
            fail_write: self.fail_write,
        }))
    }
}

struct MockChannel {
    steps: VecDeque<Step>,
    written: Vec<u8>,
    counters: Arc<Counters>,
    fail_write: bool,
}

impl Read for MockChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        match self.steps.pop_front() {
            Some(Step::Data(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.steps.push_front(Step::Data(data[n..].to_vec()));
                }
                Ok(n)
            }
            Some(Step::Echo) => {
                self.steps.push_front(Step::Data(self.written.clone()));
                self.read(buf)
            }
            Some(Step::Fail(kind)) => Err(io::Error::new(kind, "scripted failure")),
            Some(Step::Eof) | None => Ok(0),
        }
    }
}

impl Write for MockChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail_write {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "line down"));
        }
        self.written.extend_from_slice(buf);
        self.counters.writes.lock().push(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CommunicationChannel for MockChannel {
    fn describe(&self) -> String {
        "mock".to_string()
    }
}

impl Drop for MockChannel {
    fn drop(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}

fn engine_with(connector: MockConnector, config: ExchangeConfig) -> (Exchanger, Arc<Counters>) {
    let counters = connector.counters.clone();
    let engine =
        Exchanger::with_connector(config.with_retry_delay(Duration::ZERO), Arc::new(connector));
    (engine, counters)
}

fn engine(scripts: Vec<Vec<Step>>) -> (Exchanger, Arc<Counters>) {
    engine_with(MockConnector::new(scripts), ExchangeConfig::default())
}

#[test]
fn test_zero_planned_len_skips_read() {
    // A read would hit the scripted failure
    let (engine, counters) = engine(vec![vec![Step::Fail(io::ErrorKind::Other)]]);

    let response = engine.send_with_crc16(&[0x01, 0x02], 0).unwrap();

    assert!(response.is_empty());
    assert_eq!(*counters.writes.lock(), vec![vec![0x01, 0x02, 0x73, 0x13]]);
    assert_eq!(counters.reads.load(Ordering::SeqCst), 0);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_bcc_echo() {
    let (engine, _) = engine(vec![vec![Step::Echo]]);
    let response = engine.send_with_bcc(&[0xaa], 2).unwrap();
    assert_eq!(response, vec![0xaa, 0xaa]);
}

type SendFn = fn(&Exchanger, &[u8], usize) -> Result<Vec<u8>, ExchangeError>;

#[test]
fn test_every_send_operation_frames_its_scheme() {
    let raw = [0x01, 0x02];
    let sends: [(Checksum, SendFn); 6] = [
        (Checksum::None, Exchanger::send_with_no_checksum),
        (Checksum::Bcc, Exchanger::send_with_bcc),
        (Checksum::Additive, Exchanger::send_with_additive),
        (Checksum::Crc8, Exchanger::send_with_crc8),
        (Checksum::Crc16, Exchanger::send_with_crc16),
        (Checksum::CrcCcitt, Exchanger::send_with_crc_ccitt),
    ];
    for (checksum, send) in sends {
        let (engine, counters) = engine(vec![vec![Step::Echo]]);
        let expected = checksum.apply(&raw, true);
        let response = send(&engine, &raw, expected.len()).unwrap();
        assert_eq!(response, expected, "{checksum}");
        assert_eq!(*counters.writes.lock(), vec![expected.clone()], "{checksum}");
    }
}

#[test]
fn test_accumulates_single_byte_fragments() {
    let reply = Checksum::Crc16.apply(&[0x01, 0x53, 0x00, 0x2a], true);
    let mut steps: Vec<Step> = reply.iter().map(|b| Step::Data(vec![*b])).collect();
    // Anything past the planned length must not be read
    steps.push(Step::Fail(io::ErrorKind::Other));
    let (engine, counters) = engine(vec![steps]);

    let response = engine.send_with_crc16(&[0x01, 0x53], reply.len()).unwrap();

    assert_eq!(response, reply);
    assert!(Checksum::Crc16.verify(&response).unwrap());
    assert_eq!(counters.reads.load(Ordering::SeqCst), reply.len());
}

#[test]
fn test_large_response_spans_chunks() {
    let reply: Vec<u8> = (0..=255u8).chain(0..=43u8).collect();
    let (engine, _) = engine(vec![vec![Step::Data(reply.clone())]]);
    let response = engine.send_with_no_checksum(&[0x52], reply.len()).unwrap();
    assert_eq!(response, reply);
}

#[test]
fn test_overshoot_is_kept() {
    let (engine, _) = engine(vec![vec![Step::Data(vec![1, 2, 3, 4, 5])]]);
    let response = engine.send_with_no_checksum(&[0x00], 3).unwrap();
    assert_eq!(response, vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_eof_triggers_one_retry() {
    let (engine, counters) = engine(vec![
        vec![Step::Data(vec![0x01]), Step::Eof],
        vec![Step::Data(vec![0x01, 0x02, 0x03])],
    ]);

    let response = engine.send_with_crc8(&[0x10, 0x20], 3).unwrap();

    assert_eq!(response, vec![0x01, 0x02, 0x03]);
    assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 2);
    assert_eq!(engine.retry_budget().remaining(), 2);

    // Each attempt sends the same freshly framed instruction
    let framed = Checksum::Crc8.apply(&[0x10, 0x20], true);
    assert_eq!(*counters.writes.lock(), vec![framed.clone(), framed]);
}

#[test]
fn test_exhausted_budget_returns_partial() {
    let config = ExchangeConfig::default().with_eof_retries(1);
    let connector = MockConnector::new(vec![
        vec![Step::Eof],
        vec![Step::Data(vec![0x09]), Step::Eof],
        vec![Step::Eof],
    ]);
    let (engine, counters) = engine_with(connector, config);

    let err = engine.send_with_bcc(&[0x01], 4).unwrap_err();
    match &err {
        ExchangeError::UnexpectedEof { partial, expected } => {
            assert_eq!(partial, &vec![0x09]);
            assert_eq!(*expected, 4);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
    assert_eq!(engine.retry_budget().remaining(), 0);

    // The shared budget stays spent for later exchanges
    let err = engine.send_with_bcc(&[0x01], 4).unwrap_err();
    assert!(err.is_eof());
    assert_eq!(counters.opens.load(Ordering::SeqCst), 3);
}

#[test]
fn test_fail_policy_never_retries() {
    let config = ExchangeConfig::default().with_eof_policy(EofPolicy::Fail);
    let connector = MockConnector::new(vec![vec![Step::Data(vec![0x01, 0x02]), Step::Eof]]);
    let (engine, counters) = engine_with(connector, config);

    let err = engine.send_with_no_checksum(&[0x51], 4).unwrap_err();

    assert!(err.is_eof());
    assert_eq!(err.partial(), &[0x01, 0x02]);
    assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
    assert_eq!(engine.retry_budget().remaining(), 3);
}

#[test]
fn test_eof_exactly_at_planned_len_is_success() {
    let config = ExchangeConfig::default().with_eof_policy(EofPolicy::Fail);
    let connector = MockConnector::new(vec![vec![Step::Data(vec![0x01, 0x02]), Step::Eof]]);
    let (engine, _) = engine_with(connector, config);
    assert_eq!(engine.send_with_no_checksum(&[0x51], 2).unwrap(), vec![0x01, 0x02]);
}

#[test]
fn test_per_call_budget_leaves_shared_budget() {
    let (engine, counters) = engine(vec![
        vec![Step::Eof],
        vec![Step::Data(vec![0x07])],
    ]);
    let budget = RetryBudget::new(1);

    let response = engine
        .exchange_with_budget(&[0x01], Checksum::None, 1, &budget)
        .unwrap();

    assert_eq!(response, vec![0x07]);
    assert_eq!(budget.remaining(), 0);
    assert_eq!(engine.retry_budget().remaining(), 3);
    assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
}

#[test]
fn test_policy_switch_between_calls() {
    let (engine, counters) = engine(vec![
        vec![Step::Eof],
        vec![Step::Eof],
        vec![Step::Data(vec![0x01])],
    ]);

    engine.set_eof_policy(EofPolicy::Fail);
    assert!(engine.send_with_no_checksum(&[0x00], 1).unwrap_err().is_eof());
    assert_eq!(counters.opens.load(Ordering::SeqCst), 1);

    engine.set_eof_policy(EofPolicy::Retry);
    assert_eq!(engine.send_with_no_checksum(&[0x00], 1).unwrap(), vec![0x01]);
    assert_eq!(counters.opens.load(Ordering::SeqCst), 3);
}

#[test]
fn test_read_error_discards_partial() {
    let (engine, counters) = engine(vec![vec![
        Step::Data(vec![0x01]),
        Step::Fail(io::ErrorKind::ConnectionReset),
    ]]);

    let err = engine.send_with_crc16(&[0x01], 5).unwrap_err();

    assert!(matches!(err, ExchangeError::Protocol(ProtocolError::Read(_))));
    assert!(err.partial().is_empty());
    assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    assert_eq!(engine.retry_budget().remaining(), 3);
}

#[test]
fn test_interrupted_read_is_resumed() {
    let (engine, _) = engine(vec![vec![
        Step::Fail(io::ErrorKind::Interrupted),
        Step::Data(vec![0x0a, 0x0b]),
    ]]);
    assert_eq!(engine.send_with_no_checksum(&[0x00], 2).unwrap(), vec![0x0a, 0x0b]);
}

#[test]
fn test_open_failure_is_not_retried() {
    let mut connector = MockConnector::new(vec![]);
    connector.fail_open = true;
    let (engine, counters) = engine_with(connector, ExchangeConfig::default());

    let err = engine.send_with_crc16(&[0x01], 4).unwrap_err();

    assert!(matches!(err, ExchangeError::Protocol(ProtocolError::Open { .. })));
    assert_eq!(counters.endpoints.lock().len(), 1);
    assert!(counters.writes.lock().is_empty());
    assert_eq!(engine.retry_budget().remaining(), 3);
}

#[test]
fn test_write_failure_closes_channel() {
    let mut connector = MockConnector::new(vec![vec![Step::Data(vec![0x01])]]);
    connector.fail_write = true;
    let (engine, counters) = engine_with(connector, ExchangeConfig::default());

    let err = engine.send_with_bcc(&[0x01], 1).unwrap_err();

    assert!(matches!(err, ExchangeError::Protocol(ProtocolError::Write(_))));
    assert_eq!(counters.reads.load(Ordering::SeqCst), 0);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_transport_config_read_per_call() {
    let (engine, counters) = engine(vec![vec![Step::Echo], vec![Step::Echo]]);

    engine.send_with_no_checksum(&[0x01], 1).unwrap();
    engine.set_transport(TransportConfig::default().with_tcp("192.0.2.10:4001"));
    engine.send_with_no_checksum(&[0x01], 1).unwrap();

    let endpoints = counters.endpoints.lock();
    assert!(matches!(endpoints[0], TransportEndpoint::Serial { .. }));
    assert_eq!(
        endpoints[1],
        TransportEndpoint::Tcp {
            address: "192.0.2.10:4001".to_string()
        }
    );
}

#[test]
fn test_bypass_skips_transport() {
    let (engine, counters) = engine(vec![]);
    engine.install_bypass(|framed, planned_len| {
        let mut reply = framed.to_vec();
        reply.truncate(planned_len);
        Ok(reply)
    });

    let response = engine.send_with_crc_ccitt(&[0x01, 0x02], 3).unwrap();
    assert_eq!(response, vec![0x01, 0x02, 0xc5]);
    assert!(counters.endpoints.lock().is_empty());

    engine.clear_bypass();
    // Transport is used again; the default script ends the stream at once
    engine.set_eof_policy(EofPolicy::Fail);
    assert!(engine.send_with_no_checksum(&[0x00], 1).unwrap_err().is_eof());
    assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
}

#[test]
fn test_caller_instruction_untouched() {
    let (engine, _) = engine(vec![vec![Step::Echo]]);
    let mut raw = Vec::with_capacity(16);
    raw.extend_from_slice(&[0x01, 0x02]);
    let snapshot = raw.clone();

    engine.send_with_crc16(&raw, 4).unwrap();

    assert_eq!(raw, snapshot);
    assert_eq!(raw.len(), 2);
}

#[test]
fn test_shared_engine_across_threads() {
    let scripts = (0..4).map(|i| vec![Step::Data(vec![i as u8])]).collect();
    let (engine, counters) = engine(scripts);
    let engine = Arc::new(engine);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            std::thread::spawn(move || engine.send_with_no_checksum(&[0x00], 1).unwrap())
        })
        .collect();
    let mut replies: Vec<u8> = handles
        .into_iter()
        .map(|h| h.join().unwrap()[0])
        .collect();
    replies.sort_unstable();

    assert_eq!(replies, vec![0, 1, 2, 3]);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 4);
}
