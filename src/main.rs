mod config;
mod instance;
mod ollama;
mod session;
mod slide;

use iced::{
    alignment,
    event::{self, Event as IcedEvent},
    keyboard::{self, Key},
    time,
    widget::{button, column, container, row, scrollable, text, text_input, text_input::Id},
    window::{self, Level},
    Element, Font, Length, Padding, Point, Size, Subscription, Task, Theme,
};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use instance::{PidLock, Toggle};
use ollama::OllamaClient;
use session::{ChatMessage, Role, Transcript};
use slide::{Phase, Slide};

/// Resting x position of the docked panel.
const DOCKED_X: f32 = 15.0;
/// Distance from the top of the screen.
const PANEL_Y: f32 = 40.0;
/// Extra gap past the left edge when the panel is parked offscreen.
const SLIDE_GAP: f32 = 60.0;

const SPINNER_INTERVAL: Duration = Duration::from_millis(80);
const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

fn main() -> iced::Result {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("askbar=info")),
        )
        .init();

    // Toggle before any GUI work: a second launch closes the first
    let pidfile = instance::pidfile_path();
    let lock = match instance::toggle(&pidfile) {
        Ok(Toggle::ClosedExisting) => {
            info!("toggle: closed the running sidebar");
            return Ok(());
        }
        Ok(Toggle::Claimed(lock)) => lock,
        Err(e) => {
            error!("could not claim pidfile: {:#}", e);
            std::process::exit(1);
        }
    };

    let config = Config::load();

    iced::application("askbar", App::update, App::view)
        .theme(App::theme)
        .subscription(App::subscription)
        .window(window::Settings {
            size: Size::new(config.window.width as f32, config.window.height as f32),
            position: window::Position::SpecificWith(parked_position),
            decorations: false,
            resizable: false,
            level: Level::AlwaysOnTop,
            ..Default::default()
        })
        .default_font(Font::MONOSPACE)
        .run_with(move || App::new(config, lock))
}

/// The window is created parked past the left edge; the slide animation
/// brings it in from there.
fn parked_position(window: Size, _monitor: Size) -> Point {
    Point::new(-window.width - SLIDE_GAP, PANEL_Y)
}

#[derive(Debug, Clone)]
enum Message {
    InputChanged(String),
    Submit,
    ResponseReceived(String),
    ResponseFailed(String),
    ServerProbed(Result<(), String>),
    SpinnerTick,
    SlideTick,
    CloseRequested,
}

struct App {
    transcript: Transcript,
    input_text: String,
    waiting: bool,
    spinner_frame: usize,
    slide: Slide,
    server_note: Option<String>,
    client: OllamaClient,
    pid_lock: Option<PidLock>,
    panel_width: f32,
    input_id: Id,
    scroll_id: scrollable::Id,
}

impl App {
    fn new(config: Config, lock: PidLock) -> (Self, Task<Message>) {
        let client = OllamaClient::from_config(&config.ollama);

        let input_id = Id::unique();
        let app = App {
            transcript: Transcript::new(),
            input_text: String::new(),
            waiting: false,
            spinner_frame: 0,
            slide: Slide::opening(),
            server_note: None,
            client: client.clone(),
            pid_lock: Some(lock),
            panel_width: config.window.width as f32,
            input_id: input_id.clone(),
            scroll_id: scrollable::Id::unique(),
        };

        let focus_task = text_input::focus(input_id);
        let probe_task = Task::perform(
            async move { client.probe().await.map_err(|e| e.to_string()) },
            Message::ServerProbed,
        );

        (app, Task::batch([focus_task, probe_task]))
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::InputChanged(value) => {
                self.input_text = value;
                Task::none()
            }
            Message::Submit => {
                if self.input_text.trim().is_empty() || self.waiting {
                    return Task::none();
                }

                let prompt = self.input_text.trim().to_string();
                self.input_text.clear();
                self.transcript.push(Role::User, prompt.clone());
                self.waiting = true;
                self.spinner_frame = 0;

                let client = self.client.clone();
                let request = Task::future(async move {
                    match client.generate(&prompt).await {
                        Ok(reply) => Message::ResponseReceived(reply),
                        Err(e) => Message::ResponseFailed(format!("Error: {}", e)),
                    }
                });

                Task::batch([request, self.snap_to_bottom()])
            }
            Message::ResponseReceived(reply) => {
                self.transcript.push(Role::Assistant, reply);
                self.waiting = false;
                self.snap_to_bottom()
            }
            Message::ResponseFailed(error) => {
                // Failures land in the transcript like any other reply
                self.transcript.push(Role::Assistant, error);
                self.waiting = false;
                self.snap_to_bottom()
            }
            Message::ServerProbed(Ok(())) => Task::none(),
            Message::ServerProbed(Err(e)) => {
                warn!("{}", e);
                self.server_note = Some(e);
                Task::none()
            }
            Message::SpinnerTick => {
                if self.waiting {
                    self.spinner_frame = self.spinner_frame.wrapping_add(1);
                }
                Task::none()
            }
            Message::SlideTick => {
                self.slide.tick(slide::TICK.as_secs_f32());
                if self.slide.phase() == Phase::Closed {
                    if let Some(lock) = self.pid_lock.take() {
                        lock.release();
                    }
                    return iced::exit();
                }
                let x = self.panel_x();
                window::get_latest().and_then(move |id| window::move_to(id, Point::new(x, PANEL_Y)))
            }
            Message::CloseRequested => {
                if matches!(self.slide.phase(), Phase::Closing | Phase::Closed) {
                    return Task::none();
                }
                self.slide.begin_close();
                Task::none()
            }
        }
    }

    fn panel_x(&self) -> f32 {
        let parked = -self.panel_width - SLIDE_GAP;
        parked + (DOCKED_X - parked) * self.slide.offset()
    }

    fn snap_to_bottom(&self) -> Task<Message> {
        scrollable::snap_to(self.scroll_id.clone(), scrollable::RelativeOffset::END)
    }

    fn subscription(&self) -> Subscription<Message> {
        let animation = if self.slide.is_animating() {
            time::every(slide::TICK).map(|_| Message::SlideTick)
        } else {
            Subscription::none()
        };

        let spinner = if self.waiting {
            time::every(SPINNER_INTERVAL).map(|_| Message::SpinnerTick)
        } else {
            Subscription::none()
        };

        let keys = event::listen_with(|event, _status, _id| {
            if let IcedEvent::Keyboard(keyboard::Event::KeyPressed {
                key: Key::Named(keyboard::key::Named::Escape),
                ..
            }) = event
            {
                Some(Message::CloseRequested)
            } else {
                None
            }
        });

        Subscription::batch([animation, spinner, keys])
    }

    fn view(&self) -> Element<Message> {
        let feed: Element<Message> = if self.transcript.is_empty() && !self.waiting {
            self.greeting()
        } else {
            let mut messages = column![].spacing(12);
            for message in self.transcript.iter() {
                messages = messages.push(bubble(message));
            }
            if self.waiting {
                messages = messages.push(pending_bubble(self.spinner_frame));
            }
            scrollable(container(messages).padding(15).width(Length::Fill))
                .id(self.scroll_id.clone())
                .height(Length::Fill)
                .into()
        };

        let input = text_input("Type your question here...", &self.input_text)
            .on_input(Message::InputChanged)
            .on_submit(Message::Submit)
            .padding(12)
            .size(16)
            .id(self.input_id.clone());

        let send_label = if self.waiting { "..." } else { "Send" };
        let send = button(text(send_label).size(15))
            .on_press_maybe((!self.waiting).then_some(Message::Submit))
            .padding(Padding::from([12, 20]));

        let input_row = row![input, send].spacing(10);

        container(column![feed, input_row].spacing(12).padding(15))
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn greeting(&self) -> Element<Message> {
        let mut lines = column![
            text("AI Assistant").size(20),
            text("Ready to help with questions and analysis").size(14),
            text(format!("model: {}", self.client.model())).size(12),
        ]
        .spacing(8)
        .align_x(alignment::Horizontal::Center);

        if let Some(note) = &self.server_note {
            lines = lines.push(text(note.clone()).size(12));
        }

        container(lines)
            .width(Length::Fill)
            .height(Length::Fill)
            .align_x(alignment::Horizontal::Center)
            .align_y(alignment::Vertical::Center)
            .into()
    }

    fn theme(&self) -> Theme {
        Theme::Nord
    }
}

fn bubble(message: &ChatMessage) -> Element<'static, Message> {
    let style = match message.role {
        Role::User => user_bubble as fn(&Theme) -> container::Style,
        Role::Assistant => assistant_bubble,
    };

    container(
        column![
            text(message.role.label()).size(12),
            text(message.text.clone()).size(15),
        ]
        .spacing(4),
    )
    .style(style)
    .padding(12)
    .width(Length::Fill)
    .into()
}

fn pending_bubble(frame: usize) -> Element<'static, Message> {
    let glyph = SPINNER_FRAMES[frame % SPINNER_FRAMES.len()];

    container(row![text(glyph).size(15), text("Thinking...").size(15)].spacing(8))
        .style(assistant_bubble)
        .padding(12)
        .width(Length::Fill)
        .into()
}

fn user_bubble(theme: &Theme) -> container::Style {
    let palette = theme.extended_palette();
    container::Style {
        background: Some(palette.primary.weak.color.into()),
        text_color: Some(palette.primary.weak.text),
        border: iced::border::rounded(10.0),
        ..container::Style::default()
    }
}

fn assistant_bubble(theme: &Theme) -> container::Style {
    let palette = theme.extended_palette();
    container::Style {
        background: Some(palette.background.weak.color.into()),
        border: iced::border::rounded(10.0),
        ..container::Style::default()
    }
}
