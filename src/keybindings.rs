/// Centralized keybinding definitions for GlowNet
/// Keeps the help overlay, status bar and key handlers in sync

#[derive(Debug, Clone)]
pub struct KeyBinding {
    pub key: &'static str,
    pub description: &'static str,
}

/// Get all keybindings
pub fn get_all_keybindings() -> Vec<KeyBinding> {
    vec![
        KeyBinding {
            key: "↑/k",
            description: "Move selection up",
        },
        KeyBinding {
            key: "↓/j",
            description: "Move selection down",
        },
        KeyBinding {
            key: "s",
            description: "Cycle sort (PID / Process / Remote Host)",
        },
        KeyBinding {
            key: "f",
            description: "Filter by process, host or address",
        },
        KeyBinding {
            key: "Enter/Esc",
            description: "Leave filter input",
        },
        KeyBinding {
            key: "h/?",
            description: "Toggle this help",
        },
        KeyBinding {
            key: "q/Esc",
            description: "Quit (or close help if open)",
        },
        KeyBinding {
            key: "Ctrl+C",
            description: "Force quit (always exits)",
        },
    ]
}

/// Get keybindings for the status bar (most common ones)
pub fn get_status_bar_keybindings() -> Vec<(&'static str, &'static str)> {
    vec![
        ("↑↓", "Navigate"),
        ("s", "Sort"),
        ("f", "Filter"),
        ("h", "Help"),
        ("q/Ctrl+C", "Quit"),
    ]
}
