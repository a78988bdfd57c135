//! Input events
//!
//! Window-system events translated into the small vocabulary the renderer,
//! camera and overlay react to.

/// Keys the engine binds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCode {
    /// W key
    W,
    /// A key
    A,
    /// S key
    S,
    /// D key
    D,
    /// E key
    E,
    /// Q key
    Q,
    /// Tab key
    Tab,
    /// `[` key
    LeftBracket,
    /// `]` key
    RightBracket,
    /// Escape key
    Escape,
    /// Any key without a binding
    Other,
}

impl From<glfw::Key> for KeyCode {
    fn from(key: glfw::Key) -> Self {
        match key {
            glfw::Key::W => Self::W,
            glfw::Key::A => Self::A,
            glfw::Key::S => Self::S,
            glfw::Key::D => Self::D,
            glfw::Key::E => Self::E,
            glfw::Key::Q => Self::Q,
            glfw::Key::Tab => Self::Tab,
            glfw::Key::LeftBracket => Self::LeftBracket,
            glfw::Key::RightBracket => Self::RightBracket,
            glfw::Key::Escape => Self::Escape,
            _ => Self::Other,
        }
    }
}

/// One input or window event
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    /// The window was asked to close
    Quit,
    /// The framebuffer changed size
    Resized {
        /// New width in pixels
        width: u32,
        /// New height in pixels
        height: u32,
    },
    /// The window was iconified
    Minimized,
    /// The window was restored from the iconified state
    Restored,
    /// A key went down
    KeyDown(KeyCode),
    /// A key went up
    KeyUp(KeyCode),
    /// Relative cursor movement since the previous motion event
    MouseMotion {
        /// Horizontal delta in pixels
        dx: f32,
        /// Vertical delta in pixels
        dy: f32,
    },
}

/// Converts glfw window events, turning absolute cursor positions into deltas
#[derive(Debug, Default)]
pub struct InputTranslator {
    last_cursor: Option<(f64, f64)>,
}

impl InputTranslator {
    /// Create a translator with no cursor history
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate one glfw event; events the engine ignores yield `None`
    pub fn translate(&mut self, event: &glfw::WindowEvent) -> Option<InputEvent> {
        match *event {
            glfw::WindowEvent::Close => Some(InputEvent::Quit),
            glfw::WindowEvent::FramebufferSize(width, height) => Some(InputEvent::Resized {
                width: width.max(0) as u32,
                height: height.max(0) as u32,
            }),
            glfw::WindowEvent::Iconify(true) => Some(InputEvent::Minimized),
            glfw::WindowEvent::Iconify(false) => Some(InputEvent::Restored),
            glfw::WindowEvent::Key(key, _, glfw::Action::Press, _) => Some(InputEvent::KeyDown(key.into())),
            glfw::WindowEvent::Key(key, _, glfw::Action::Release, _) => Some(InputEvent::KeyUp(key.into())),
            glfw::WindowEvent::CursorPos(x, y) => {
                let previous = self.last_cursor.replace((x, y));
                previous.map(|(px, py)| InputEvent::MouseMotion {
                    dx: (x - px) as f32,
                    dy: (y - py) as f32,
                })
            }
            _ => None,
        }
    }
}
