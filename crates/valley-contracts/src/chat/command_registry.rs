#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    /// Name under which the trailing argument is stored, if the command takes one.
    pub arg_key: Option<&'static str>,
}

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "category",
        action: "select_category",
        arg_key: Some("category"),
    },
    CommandSpec {
        command: "style",
        action: "select_style",
        arg_key: Some("style"),
    },
    CommandSpec {
        command: "retry",
        action: "retry",
        arg_key: Some("key"),
    },
    CommandSpec {
        command: "focus",
        action: "focus",
        arg_key: Some("key"),
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "photo",
        action: "set_photo",
        arg_key: Some("path"),
    },
    CommandSpec {
        command: "save",
        action: "save_gallery",
        arg_key: Some("path"),
    },
];

pub(crate) const NOTE_COMMAND: CommandSpec = CommandSpec {
    command: "note",
    action: "annotate",
    arg_key: Some("text"),
};

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "full",
        action: "select_full_transform",
        arg_key: None,
    },
    CommandSpec {
        command: "back",
        action: "back",
        arg_key: None,
    },
    CommandSpec {
        command: "reset",
        action: "reset",
        arg_key: None,
    },
    CommandSpec {
        command: "next",
        action: "focus_next",
        arg_key: None,
    },
    CommandSpec {
        command: "prev",
        action: "focus_prev",
        arg_key: None,
    },
    CommandSpec {
        command: "status",
        action: "status",
        arg_key: None,
    },
    CommandSpec {
        command: "wait",
        action: "wait",
        arg_key: None,
    },
    CommandSpec {
        command: "categories",
        action: "list_categories",
        arg_key: None,
    },
    CommandSpec {
        command: "logout",
        action: "sign_out",
        arg_key: None,
    },
    CommandSpec {
        command: "help",
        action: "help",
        arg_key: None,
    },
    CommandSpec {
        command: "quit",
        action: "quit",
        arg_key: None,
    },
];

pub const SESSION_HELP_COMMANDS: &[&str] = &[
    "/categories",
    "/category",
    "/photo",
    "/style",
    "/full",
    "/back",
    "/reset",
    "/status",
    "/wait",
    "/retry",
    "/next",
    "/prev",
    "/focus",
    "/note",
    "/save",
    "/logout",
    "/help",
    "/quit",
];
