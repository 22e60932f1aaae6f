//! 系统预定义回复模块
//!
//! 面向用户的西班牙语固定文案。

use crate::core::message::types::MediaKind;

/// 欢迎语（精确匹配 "hola" 时回复）
pub const BIENVENIDA: &str = "¡Hola! 👋 Soy Electra, el asistente virtual de ElectronicsJS. Estoy aquí para ayudarte con información sobre nuestros productos y servicios. \n\nSi en cualquier momento deseas hablar con un representante humano, puedes escribir \"agente\" o \"hablar con persona real\".\n\n¿En qué puedo ayudarte hoy?";

/// 人工客服转接提示
pub const SOLICITUD_HUMANO: &str = "Entiendo que prefieres hablar con un representante humano. Voy a conectarte con uno de nuestros agentes.\n\n⏳ Por favor, ten en cuenta que puede haber un tiempo de espera. Mientras tanto, ¿hay algo específico en lo que pueda ayudarte?\n\nPara volver al asistente virtual en cualquier momento, escribe \"volver al bot\".";

/// 营业时间外的通用回复
pub const TIENDA_CERRADA: &str = "🕒 Nuestra tienda está cerrada en este momento.\n\n    Horario de atención:\n    - Lunes a Viernes: 6:00 AM - 10:00 PM\n    - Sábados y Domingos: 7:00 AM - 8:00 PM\n    (Hora de Panamá)\n\n    Aunque la tienda está cerrada, puedo ayudarte con:\n    - Información básica sobre productos\n    - Información sobre la empresa\n    - Preguntas frecuentes\n\n    Para consultas más complejas, como hacer reclamos o realizar compras, te recomiendo visitar nuestra página web: https://irvin-benitez.software o contactarnos durante nuestro horario de atención.\n\n    ¿En qué puedo ayudarte?";

/// 技术故障兜底回复
pub const ERROR: &str = "Lo siento, estamos experimentando dificultades técnicas. Por favor, intenta nuevamente en unos momentos.\n\nSi el problema persiste, puedes escribir \"agente\" para hablar con una persona real.";

/// 生成超时回复
pub const TIEMPO_ESPERA: &str = "Lo siento, tu mensaje está tomando más tiempo del esperado. Por favor, intenta nuevamente o escribe \"agente\" para hablar con una persona real.";

/// 收到媒体内容的基础回复
pub const MEDIO_RECIBIDO: &str = "¡Gracias por compartir este contenido! 📁\n\nPara brindarte una mejor atención, te conectaré con uno de nuestros representantes que podrá revisar tu archivo y ayudarte personalmente.\n\n⏳ Un agente se pondrá en contacto contigo pronto. Mientras tanto, ¿hay algo específico que quieras mencionar sobre el archivo compartido?";

/// 垃圾信息警告（触发冷却时回复）
pub const ADVERTENCIA_SPAM: &str = "⚠️ Has enviado demasiados mensajes repetidos. Por favor, espera 2 minutos antes de enviar más mensajes.";

/// 消息频率超限回复
pub const LIMITE_MENSAJES: &str = "⚠️ Has enviado demasiados mensajes en poco tiempo. \n\nPor favor, espera un momento antes de enviar más mensajes. Esto nos ayuda a mantener una conversación más efectiva. \n\nSi tienes una urgencia, escribe \"agente\" para hablar con una persona real.";

/// 重复消息提示（第 2、3 次重复时回复）
pub const MENSAJE_REPETIDO: &str = "Parece que estás enviando el mismo mensaje repetidamente. \n\n¿Hay algo específico en lo que pueda ayudarte? Si necesitas hablar con un agente humano, solo escribe \"agente\".";

/// 营业时间查询回复
pub const HORARIO: &str = "Horario de atención:\n    - Lunes a Viernes: 6:00 AM - 10:00 PM\n    - Sábados y Domingos: 7:00 AM - 8:00 PM\n    (Hora de Panamá)";

/// 官网信息回复
pub const PAGINA_WEB: &str = "Para más información, visita nuestra página web: https://irvin-benitez.software. Estamos aquí para ayudarte con cualquier consulta que tengas sobre nuestros productos y servicios. ¡Gracias por elegir ElectronicsJS!";

/// 营业时间外拒绝转接人工的回复
pub const RECHAZO_AGENTE_CERRADO: &str = "Lo siento, fuera del horario de atención no podemos conectarte con un agente. Por favor, intenta durante nuestro horario de atención.";

/// 用户主动返回机器人时的回复
pub const BIENVENIDO_DE_VUELTA: &str = "¡Bienvenido de vuelta! ¿En qué puedo ayudarte?";

/// 暂停到期、机器人重新可用时的回复
pub const ASISTENTE_DISPONIBLE: &str = "El asistente virtual está nuevamente disponible. ¿En qué puedo ayudarte?";

/// 营业时间外的简短回复（常规文本消息走 AI 之前的兜底）
pub const CERRADO_BREVE: &str = "🕒 Nuestra tienda está cerrada en este momento. El horario de atención es de Lunes a Viernes de 6:00 AM a 10:00 PM y Sábados y Domingos de 7:00 AM a 8:00 PM (Hora de Panamá).\n\n🌐 Visita nuestra web: https://irvin-benitez.software";

/// 购买意向附加文案（追加到 AI 回复末尾）
pub const OPCIONES_COMPRA: &str = "\n\n¿Te gustaría comprar esta laptop? Aquí tienes las opciones disponibles:\n            - 🗣️ Hablar con un agente real: Escribe \"agente\" para conectarte con un representante.\n            - 🌐 Comprar en línea: Visita nuestra página web: https://irvin-benitez.software\n            - 🏬 Visitar la tienda: Estamos ubicados en La chorrera. ¡Te esperamos!";

/// 按媒体类型生成媒体回复
///
/// 在基础文案后追加一行媒体类型说明（贴纸无附加说明）。
pub fn media_received(kind: MediaKind) -> String {
    let nota = match kind {
        MediaKind::Image => "\n\n📸 He notado que has compartido una imagen.",
        MediaKind::Audio => "\n\n🎵 He notado que has compartido un mensaje de voz.",
        MediaKind::Video => "\n\n🎥 He notado que has compartido un video.",
        MediaKind::Document => "\n\n📄 He notado que has compartido un documento.",
        MediaKind::Sticker => "",
    };

    format!("{}{}", MEDIO_RECIBIDO, nota)
}
