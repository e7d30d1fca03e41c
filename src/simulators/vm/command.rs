use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A symbolic addressing mode in VM code.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Hash)]
pub enum Segment {
    Local,
    Argument,
    This,
    That,
    Constant,
    Static,
    Temp,
    Pointer,
}

impl FromStr for Segment {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Segment::Local),
            "argument" => Ok(Segment::Argument),
            "this" => Ok(Segment::This),
            "that" => Ok(Segment::That),
            "constant" => Ok(Segment::Constant),
            "static" => Ok(Segment::Static),
            "temp" => Ok(Segment::Temp),
            "pointer" => Ok(Segment::Pointer),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Segment::Local => "local",
            Segment::Argument => "argument",
            Segment::This => "this",
            Segment::That => "that",
            Segment::Constant => "constant",
            Segment::Static => "static",
            Segment::Temp => "temp",
            Segment::Pointer => "pointer",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Neg,
    Eq,
    Gt,
    Lt,
    And,
    Or,
    Not,
}

impl FromStr for ArithmeticOp {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(ArithmeticOp::Add),
            "sub" => Ok(ArithmeticOp::Sub),
            "neg" => Ok(ArithmeticOp::Neg),
            "eq" => Ok(ArithmeticOp::Eq),
            "gt" => Ok(ArithmeticOp::Gt),
            "lt" => Ok(ArithmeticOp::Lt),
            "and" => Ok(ArithmeticOp::And),
            "or" => Ok(ArithmeticOp::Or),
            "not" => Ok(ArithmeticOp::Not),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ArithmeticOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ArithmeticOp::Add => "add",
            ArithmeticOp::Sub => "sub",
            ArithmeticOp::Neg => "neg",
            ArithmeticOp::Eq => "eq",
            ArithmeticOp::Gt => "gt",
            ArithmeticOp::Lt => "lt",
            ArithmeticOp::And => "and",
            ArithmeticOp::Or => "or",
            ArithmeticOp::Not => "not",
        };
        write!(f, "{}", name)
    }
}

/// One parsed VM command. The set is closed, so dispatch is a plain match.
///
/// Push/pop carry the basename of their source file because the static
/// segment is resolved per file at run time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmCommand {
    Arithmetic {
        op: ArithmeticOp,
        line: usize,
    },
    Push {
        segment: Segment,
        index: u16,
        file: String,
        line: usize,
    },
    Pop {
        segment: Segment,
        index: u16,
        file: String,
        line: usize,
    },
    Label {
        name: String,
        line: usize,
    },
    Goto {
        label: String,
        line: usize,
    },
    IfGoto {
        label: String,
        line: usize,
    },
    Function {
        name: String,
        n_locals: u16,
        line: usize,
    },
    Call {
        name: String,
        n_args: u16,
        line: usize,
    },
    Return {
        line: usize,
    },
}

impl VmCommand {
    pub fn source_line(&self) -> usize {
        match self {
            VmCommand::Arithmetic { line, .. }
            | VmCommand::Push { line, .. }
            | VmCommand::Pop { line, .. }
            | VmCommand::Label { line, .. }
            | VmCommand::Goto { line, .. }
            | VmCommand::IfGoto { line, .. }
            | VmCommand::Function { line, .. }
            | VmCommand::Call { line, .. }
            | VmCommand::Return { line } => *line,
        }
    }
}

impl fmt::Display for VmCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VmCommand::Arithmetic { op, .. } => write!(f, "{}", op),
            VmCommand::Push { segment, index, .. } => write!(f, "push {} {}", segment, index),
            VmCommand::Pop { segment, index, .. } => write!(f, "pop {} {}", segment, index),
            VmCommand::Label { name, .. } => write!(f, "label {}", name),
            VmCommand::Goto { label, .. } => write!(f, "goto {}", label),
            VmCommand::IfGoto { label, .. } => write!(f, "if-goto {}", label),
            VmCommand::Function { name, n_locals, .. } => {
                write!(f, "function {} {}", name, n_locals)
            }
            VmCommand::Call { name, n_args, .. } => write!(f, "call {} {}", name, n_args),
            VmCommand::Return { .. } => write!(f, "return"),
        }
    }
}

/// A parsed VM program. Immutable after load.
#[derive(Debug, Default, Clone)]
pub struct VmProgram {
    pub commands: Vec<VmCommand>,
    /// scoped label name (`function$label`) -> command index
    pub labels: HashMap<String, usize>,
    /// function name -> index of its `function` command
    pub functions: HashMap<String, usize>,
    /// source basenames in load order, for static-segment allocation
    pub source_files: Vec<String>,
}
