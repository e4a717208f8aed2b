// Crossfire command, event and attribute names
//
// Requests carry a command name, events an event name. Both exchange
// JSON objects whose well-known keys are collected in `attributes`.

// Request commands
pub mod requests {
    pub const BACKTRACE: &str = "backtrace";
    pub const CHANGE_BREAKPOINT: &str = "changebreakpoint";
    pub const CLEAR_BREAKPOINT: &str = "clearbreakpoint";
    pub const CONTINUE: &str = "continue";
    pub const CREATE_CONTEXT: &str = "createcontext";
    pub const DISABLE_TOOLS: &str = "disabletools";
    pub const ENABLE_TOOLS: &str = "enabletools";
    pub const EVALUATE: &str = "evaluate";
    pub const FRAME: &str = "frame";
    pub const GET_BREAKPOINTS: &str = "getbreakpoints";
    pub const GET_TOOLS: &str = "gettools";
    pub const LIST_CONTEXTS: &str = "listcontexts";
    pub const LOOKUP: &str = "lookup";
    pub const SCRIPT: &str = "script";
    pub const SCRIPTS: &str = "scripts";
    pub const SET_BREAKPOINT: &str = "setbreakpoint";
    pub const SUSPEND: &str = "suspend";
    pub const UPDATE_CONTEXT: &str = "updatecontext";
    pub const VERSION: &str = "version";
}

// Event names
pub mod events {
    pub const CLOSED: &str = "closed";
    pub const ON_BREAK: &str = "onBreak";
    pub const ON_CONSOLE_DEBUG: &str = "onConsoleDebug";
    pub const ON_CONSOLE_ERROR: &str = "onConsoleError";
    pub const ON_CONSOLE_INFO: &str = "onConsoleInfo";
    pub const ON_CONSOLE_LOG: &str = "onConsoleLog";
    pub const ON_CONSOLE_WARN: &str = "onConsoleWarn";
    pub const ON_CONTEXT_CREATED: &str = "onContextCreated";
    pub const ON_CONTEXT_DESTROYED: &str = "onContextDestroyed";
    pub const ON_INSPECT_NODE: &str = "onInspectNode";
    pub const ON_RESUME: &str = "onResume";
    pub const ON_SCRIPT: &str = "onScript";
    pub const ON_TOGGLE_BREAKPOINT: &str = "onToggleBreakpoint";
}

// JSON keys shared by requests, responses and events
pub mod attributes {
    pub const ATTRIBUTES: &str = "attributes";
    pub const BREAKPOINT: &str = "breakpoint";
    pub const BREAKPOINTS: &str = "breakpoints";
    pub const COLUMN_OFFSET: &str = "columnOffset";
    pub const COMPILATION_TYPE: &str = "compilationType";
    pub const CONDITION: &str = "condition";
    pub const CONSTRUCTOR: &str = "constructor";
    pub const CONTEXT_ID: &str = "contextId";
    pub const CONTEXTS: &str = "contexts";
    pub const CURRENT: &str = "current";
    pub const ENABLED: &str = "enabled";
    pub const EXPRESSION: &str = "expression";
    pub const FRAME: &str = "frame";
    pub const FRAMES: &str = "frames";
    pub const FROM_FRAME: &str = "fromFrame";
    pub const FUNC: &str = "func";
    pub const FUNCTION_NAME: &str = "functionName";
    pub const HANDLE: &str = "handle";
    pub const HREF: &str = "href";
    pub const ID: &str = "id";
    pub const INCLUDE_SCOPES: &str = "includeScopes";
    pub const INCLUDE_SOURCE: &str = "includeSource";
    pub const INDEX: &str = "index";
    pub const LINE: &str = "line";
    pub const LINE_COUNT: &str = "lineCount";
    pub const LINE_OFFSET: &str = "lineOffset";
    pub const LOCALS: &str = "locals";
    pub const LOCATION: &str = "location";
    pub const NUMBER: &str = "number";
    pub const RESULT: &str = "result";
    pub const SCRIPT: &str = "script";
    pub const SCRIPTS: &str = "scripts";
    pub const SET: &str = "set";
    pub const SOURCE: &str = "source";
    pub const SOURCE_LENGTH: &str = "sourceLength";
    pub const THIS: &str = "this";
    pub const TO_FRAME: &str = "toFrame";
    pub const TOOLS: &str = "tools";
    pub const TYPE: &str = "type";
    pub const URL: &str = "url";
    pub const VALUE: &str = "value";
    pub const VERSION: &str = "version";
}

// Value type tags used by "type" keys
pub mod value_types {
    pub const ARRAY: &str = "array";
    pub const BOOLEAN: &str = "boolean";
    pub const FUNCTION: &str = "function";
    pub const LINE: &str = "line";
    pub const NULL: &str = "null";
    pub const NUMBER: &str = "number";
    pub const OBJECT: &str = "object";
    pub const STRING: &str = "string";
    pub const UNDEFINED: &str = "undefined";
}
