use crate::{
    command::{CommandProcessor, FixtureAction},
    config::FixtureConfig,
    error::{DatagramError, HardwareError},
    fade::{demo_lead_in, Animation, FadeEngine, Frame},
    http::{reason_phrase, HttpRequest, HttpResponse},
    pwm::{Channel, Duties, PwmBank, PwmChannel},
    state::DeviceState,
    tlv::TlvMessage,
    types::SystemInfo,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub response: HttpResponse,
    pub actions: Vec<FixtureAction>,
    pub notice: Option<String>,
}

impl HttpReply {
    fn rejected(status: u16, notice: String) -> Self {
        Self {
            response: HttpResponse::error(status),
            actions: Vec::new(),
            notice: Some(notice),
        }
    }
}

#[derive(Debug)]
pub struct Fixture<C> {
    state: DeviceState,
    bank: PwmBank<C>,
    fade: FadeEngine,
    brightness_scale: f64,
    auth_secret: String,
    processor: CommandProcessor,
}

impl<C: PwmChannel> Fixture<C> {
    pub fn new(
        config: &FixtureConfig,
        mut bank: PwmBank<C>,
        sysinfo: SystemInfo,
    ) -> Result<Self, HardwareError> {
        let state = DeviceState::from_persisted(&config.state);
        bank.set_frequency(state.pwm_frequency_hz)?;
        bank.write(Duties::OFF)?;

        Ok(Self {
            fade: FadeEngine::new(state.fade_duration_ms),
            state,
            bank,
            brightness_scale: config.brightness_scale,
            auth_secret: config.auth_secret.clone(),
            processor: CommandProcessor::new(sysinfo),
        })
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn bank(&self) -> &PwmBank<C> {
        &self.bank
    }

    pub fn is_idle(&self) -> bool {
        self.fade.is_idle()
    }

    pub fn start(&mut self, light_test: bool) -> Result<(), HardwareError> {
        if light_test {
            self.fade.play(Animation::light_test(
                self.state.fade_duration_ms,
                self.brightness_scale,
            ));
        }
        self.apply_target()
    }

    pub fn apply_target(&mut self) -> Result<(), HardwareError> {
        self.bank.set_frequency(self.state.pwm_frequency_hz)?;
        self.fade.set_duration_ms(self.state.fade_duration_ms);
        self.fade.fade_to(self.state.target_duties(self.brightness_scale));
        Ok(())
    }

    pub fn start_demo(&mut self) {
        self.fade.set_duration_ms(self.state.fade_duration_ms);
        self.fade.fade_to(demo_lead_in(self.brightness_scale));
        self.fade.play(Animation::demo_sweep(self.brightness_scale));
        self.fade.fade_to(self.state.target_duties(self.brightness_scale));
    }

    pub fn handle_http(&mut self, request: &HttpRequest) -> HttpReply {
        if let Err(status) = request.check_access(&self.auth_secret) {
            return HttpReply::rejected(
                status,
                format!(
                    "{} {} rejected: {}",
                    request.head.method,
                    request.head.path,
                    reason_phrase(status)
                ),
            );
        }

        let outcome = match self.processor.handle(&mut self.state, &request.body) {
            Ok(outcome) => outcome,
            Err(err) => return HttpReply::rejected(500, err.to_string()),
        };
        let body = match serde_json::to_vec(&outcome.response) {
            Ok(body) => body,
            Err(err) => {
                return HttpReply::rejected(500, format!("response encoding failed: {err}"))
            }
        };

        HttpReply {
            response: HttpResponse::json(body),
            actions: outcome.actions,
            notice: outcome
                .ignored_command
                .map(|command| format!("ignoring unknown command {command:?}")),
        }
    }

    pub fn handle_datagram(
        &mut self,
        datagram: &[u8],
    ) -> Result<Vec<(Channel, u16)>, DatagramError> {
        let message = TlvMessage::decode(datagram)?;
        message.authorize(&self.auth_secret)?;

        let duties = message.channel_duties();
        for &(channel, duty) in &duties {
            self.bank.write_channel(channel, duty)?;
        }
        self.state.duties = self.bank.duties();
        Ok(duties)
    }

    pub fn tick(&mut self) -> Result<Option<Frame>, HardwareError> {
        let Some(frame) = self.fade.next_frame(self.bank.duties()) else {
            return Ok(None);
        };
        if let Err(err) = self.bank.write(frame.duties) {
            self.fade.cancel();
            self.state.duties = self.bank.duties();
            return Err(err);
        }
        self.state.duties = frame.duties;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::PersistedState,
        pwm::SimulatedChannel,
        tlv::{encode, TAG_AUTH, TAG_GREEN, TAG_RED},
        types::Power,
    };
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use pretty_assertions::assert_eq;

    fn sysinfo() -> SystemInfo {
        SystemInfo {
            id: "00ff".to_string(),
            freq: "0".to_string(),
            release: "0.1.0".to_string(),
            version: "test".to_string(),
            machine: "sim".to_string(),
        }
    }

    fn fixture(config: FixtureConfig) -> Fixture<SimulatedChannel> {
        let bank = PwmBank::new(
            SimulatedChannel::new(1_000),
            SimulatedChannel::new(1_000),
            SimulatedChannel::new(1_000),
        );
        Fixture::new(&config, bank, sysinfo()).unwrap()
    }

    fn settle(fixture: &mut Fixture<SimulatedChannel>) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = fixture.tick().unwrap() {
            frames.push(frame);
        }
        frames
    }

    fn post(body: &str, auth: Option<&str>) -> HttpRequest {
        let auth = auth
            .map(|token| {
                let credentials = STANDARD.encode(format!("u:{token}"));
                format!("Authorization: Basic {credentials}\r\n")
            })
            .unwrap_or_default();
        let raw = format!(
            "POST /command HTTP/1.1\r\n{auth}Content-Length: {}\r\n\r\n{body}",
            body.len()
        );
        HttpRequest::parse(raw.as_bytes()).unwrap()
    }

    #[test]
    fn new_tunes_outputs_to_persisted_frequency() {
        let fixture = fixture(FixtureConfig::default());

        assert_eq!(fixture.bank().frequency(), 240);
        assert_eq!(fixture.bank().duties(), Duties::OFF);
        assert!(fixture.is_idle());
    }

    #[test]
    fn start_without_test_fades_to_restored_target() {
        let config = FixtureConfig {
            state: PersistedState {
                power: Power::On,
                hue: 0.0,
                saturation: 100.0,
                brightness_normalize: false,
                ..PersistedState::default()
            },
            ..FixtureConfig::default()
        };
        let mut fixture = fixture(config);

        fixture.start(false).unwrap();
        let frames = settle(&mut fixture);

        assert_eq!(frames.len(), 20);
        assert_eq!(fixture.state().duties, Duties::new(1023, 0, 0));
        assert_eq!(fixture.bank().duties(), Duties::new(1023, 0, 0));
    }

    #[test]
    fn light_test_runs_before_target() {
        let mut fixture = fixture(FixtureConfig::default());

        fixture.start(true).unwrap();
        let frames = settle(&mut fixture);

        assert_eq!(frames.len(), 7 * 21);
        assert_eq!(fixture.bank().duties(), Duties::OFF);
    }

    #[test]
    fn http_update_applies_after_actions_run() {
        let mut fixture = fixture(FixtureConfig::default());

        let reply = fixture.handle_http(&post(
            r#"{"state":{"switch":"on","red":0,"green":255,"blue":0,"brnorm":false,"fadetime":0}}"#,
            None,
        ));

        assert_eq!(reply.response.status, 200);
        assert_eq!(reply.actions, vec![FixtureAction::ApplyTarget]);
        assert_eq!(fixture.bank().duties(), Duties::OFF);

        fixture.apply_target().unwrap();
        let frames = settle(&mut fixture);

        assert_eq!(frames, vec![Frame::new(Duties::new(0, 1023, 0), 0)]);
        let json: serde_json::Value = serde_json::from_slice(&reply.response.body).unwrap();
        assert_eq!(json["state"]["hex"], "#00FF00");
        assert_eq!(json["state"]["switch"], "on");
    }

    #[test]
    fn frequency_change_is_applied_once_before_the_fade() {
        let mut fixture = fixture(FixtureConfig::default());
        fixture.handle_http(&post(r#"{"state":{"frequency":500}}"#, None));

        fixture.apply_target().unwrap();

        assert_eq!(fixture.bank().frequency(), 500);
        assert_eq!(fixture.bank().channel(Channel::Blue).frequency_writes(), 2);
    }

    #[test]
    fn auth_failure_leaves_state_untouched() {
        let mut fixture = fixture(FixtureConfig {
            auth_secret: "secret".to_string(),
            ..FixtureConfig::default()
        });

        let reply = fixture.handle_http(&post(r#"{"state":{"switch":"on"}}"#, Some("nope")));

        assert_eq!(reply.response.status, 401);
        assert!(reply.actions.is_empty());
        assert_eq!(fixture.state().power, Power::Off);

        let reply = fixture.handle_http(&post(r#"{"state":{"switch":"on"}}"#, Some("secret")));
        assert_eq!(reply.response.status, 200);
        assert_eq!(fixture.state().power, Power::On);
    }

    #[test]
    fn malformed_json_is_a_server_error() {
        let mut fixture = fixture(FixtureConfig::default());

        let reply = fixture.handle_http(&post("{oops", None));

        assert_eq!(reply.response.status, 500);
        assert!(reply.notice.is_some());
    }

    #[test]
    fn datagram_writes_bypass_the_fade_engine() {
        let mut fixture = fixture(FixtureConfig {
            auth_secret: "k".to_string(),
            ..FixtureConfig::default()
        });
        let datagram = encode(&[
            (TAG_AUTH, b"k"),
            (TAG_RED, &700u16.to_be_bytes()),
            (TAG_GREEN, &2000u16.to_be_bytes()),
        ]);

        let written = fixture.handle_datagram(&datagram).unwrap();

        assert_eq!(written, vec![(Channel::Red, 700)]);
        assert_eq!(fixture.bank().duties(), Duties::new(700, 0, 0));
        assert_eq!(fixture.state().duties, Duties::new(700, 0, 0));
        assert!(fixture.is_idle());
    }

    #[test]
    fn unauthenticated_datagram_is_dropped() {
        let mut fixture = fixture(FixtureConfig {
            auth_secret: "k".to_string(),
            ..FixtureConfig::default()
        });
        let datagram = encode(&[(TAG_RED, &700u16.to_be_bytes())]);

        assert!(matches!(
            fixture.handle_datagram(&datagram),
            Err(DatagramError::Tlv(crate::error::TlvError::Unauthorized))
        ));
        assert_eq!(fixture.bank().duties(), Duties::OFF);
    }

    #[test]
    fn demo_returns_to_target() {
        let mut fixture = fixture(FixtureConfig {
            state: PersistedState {
                fade_duration_ms: 100,
                ..PersistedState::default()
            },
            ..FixtureConfig::default()
        });

        fixture.start_demo();
        let frames = settle(&mut fixture);

        assert_eq!(frames.len(), 2 + 120 + 2);
        assert_eq!(frames[1].duties, Duties::new(1020, 0, 0));
        assert_eq!(fixture.bank().duties(), Duties::OFF);
    }
}
